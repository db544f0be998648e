//! CitySim Geo - Geometry conversion and spatial operations
//!
//! This crate handles the geospatial side of the geometry store: conversion
//! between the canonical geometry model and the `geo`/`geojson` crates, the
//! area-of-interest filter policy, multi-polygon normalization for renderers,
//! and zone mask rasterization.

pub mod mask;
pub mod models;
pub mod normalize;
pub mod spatial;
