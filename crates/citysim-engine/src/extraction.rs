//! Result extraction protocol.
//!
//! The rendering and export layer downloads the content of a result and asks
//! the extractor registered for (analysis type, result name) to turn it into
//! a display artifact or a file. A registry miss is an unsupported operation.

use citysim_core::error::{CitysimError, Result};
use citysim_core::models::AnalysisResult;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Downloaded content of one result instance
#[derive(Debug, Clone, Copy)]
pub struct ResultContent<'a> {
    /// Local path per content part
    pub paths: &'a BTreeMap<String, PathBuf>,
    pub result: &'a AnalysisResult,
    /// Parameters of the group the result was produced for
    pub parameters: &'a serde_json::Value,
}

impl<'a> ResultContent<'a> {
    pub fn new(
        paths: &'a BTreeMap<String, PathBuf>,
        result: &'a AnalysisResult,
        parameters: &'a serde_json::Value,
    ) -> Self {
        Self {
            paths,
            result,
            parameters,
        }
    }

    /// Path of the `"default"` part, or of the first part
    pub fn primary_path(&self) -> Result<&'a Path> {
        self.paths
            .get("default")
            .or_else(|| self.paths.values().next())
            .map(PathBuf::as_path)
            .ok_or_else(|| CitysimError::InvalidParameter {
                name: "content_paths".to_string(),
                reason: format!("no content was downloaded for result '{}'", self.result.name),
            })
    }
}

fn unsupported(result: &AnalysisResult, operation: &str) -> CitysimError {
    CitysimError::UnsupportedOperation {
        target: result.name.clone(),
        operation: operation.to_string(),
    }
}

/// Turns downloaded result content into renderable JSON or export files
pub trait ResultExtractor: Send + Sync {
    /// Formats `export_feature` and `export_delta_feature` can write
    fn export_formats(&self) -> &[&'static str];

    fn extract_feature(&self, content: &ResultContent<'_>) -> Result<serde_json::Value>;

    /// Compare two instances of the same result
    fn extract_delta_feature(
        &self,
        a: &ResultContent<'_>,
        _b: &ResultContent<'_>,
    ) -> Result<serde_json::Value> {
        Err(unsupported(a.result, "extract_delta_feature"))
    }

    fn export_feature(&self, content: &ResultContent<'_>, format: &str, dest: &Path) -> Result<()>;

    fn export_delta_feature(
        &self,
        a: &ResultContent<'_>,
        _b: &ResultContent<'_>,
        _format: &str,
        _dest: &Path,
    ) -> Result<()> {
        Err(unsupported(a.result, "export_delta_feature"))
    }
}

/// Extractors keyed by (analysis type, result name)
#[derive(Default)]
pub struct ExtractorRegistry {
    extractors: HashMap<(String, String), Arc<dyn ResultExtractor>>,
}

impl ExtractorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the extractors of every built-in analysis
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        crate::analyses::urban_wind::register_extractors(&mut registry);
        registry
    }

    pub fn register(
        &mut self,
        analysis_type: &str,
        result_name: &str,
        extractor: Arc<dyn ResultExtractor>,
    ) {
        self.extractors
            .insert((analysis_type.to_string(), result_name.to_string()), extractor);
    }

    pub fn contains(&self, analysis_type: &str, result_name: &str) -> bool {
        self.extractors
            .contains_key(&(analysis_type.to_string(), result_name.to_string()))
    }

    fn lookup(
        &self,
        analysis_type: &str,
        result: &AnalysisResult,
        operation: &str,
    ) -> Result<&Arc<dyn ResultExtractor>> {
        self.extractors
            .get(&(analysis_type.to_string(), result.name.clone()))
            .ok_or_else(|| CitysimError::UnsupportedOperation {
                target: format!("{}/{}", analysis_type, result.name),
                operation: operation.to_string(),
            })
    }

    fn check_format(extractor: &dyn ResultExtractor, result: &AnalysisResult, format: &str) -> Result<()> {
        if extractor.export_formats().iter().any(|f| *f == format) {
            Ok(())
        } else {
            Err(CitysimError::UnsupportedFormat {
                result: result.name.clone(),
                format: format.to_string(),
            })
        }
    }

    fn check_names(a: &ResultContent<'_>, b: &ResultContent<'_>) -> Result<()> {
        if a.result.name == b.result.name {
            Ok(())
        } else {
            Err(CitysimError::ResultNameMismatch {
                left: a.result.name.clone(),
                right: b.result.name.clone(),
            })
        }
    }

    pub fn extract_feature(
        &self,
        analysis_type: &str,
        content: &ResultContent<'_>,
    ) -> Result<serde_json::Value> {
        self.lookup(analysis_type, content.result, "extract_feature")?
            .extract_feature(content)
    }

    /// Delta of two instances of one result; mismatched names are rejected
    /// before any content is read
    pub fn extract_delta_feature(
        &self,
        analysis_type: &str,
        a: &ResultContent<'_>,
        b: &ResultContent<'_>,
    ) -> Result<serde_json::Value> {
        Self::check_names(a, b)?;
        self.lookup(analysis_type, a.result, "extract_delta_feature")?
            .extract_delta_feature(a, b)
    }

    pub fn export_feature(
        &self,
        analysis_type: &str,
        content: &ResultContent<'_>,
        format: &str,
        dest: &Path,
    ) -> Result<()> {
        let extractor = self.lookup(analysis_type, content.result, "export_feature")?;
        Self::check_format(extractor.as_ref(), content.result, format)?;
        extractor.export_feature(content, format, dest)?;
        tracing::info!(
            analysis_type,
            result = %content.result.name,
            format,
            dest = %dest.display(),
            "Exported result"
        );
        Ok(())
    }

    pub fn export_delta_feature(
        &self,
        analysis_type: &str,
        a: &ResultContent<'_>,
        b: &ResultContent<'_>,
        format: &str,
        dest: &Path,
    ) -> Result<()> {
        Self::check_names(a, b)?;
        let extractor = self.lookup(analysis_type, a.result, "export_delta_feature")?;
        Self::check_format(extractor.as_ref(), a.result, format)?;
        extractor.export_delta_feature(a, b, format, dest)?;
        tracing::info!(
            analysis_type,
            result = %a.result.name,
            format,
            dest = %dest.display(),
            "Exported result delta"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use citysim_core::models::DataRef;

    struct Echo;

    impl ResultExtractor for Echo {
        fn export_formats(&self) -> &[&'static str] {
            &["json"]
        }

        fn extract_feature(&self, content: &ResultContent<'_>) -> Result<serde_json::Value> {
            Ok(serde_json::json!({ "name": content.result.name }))
        }

        fn export_feature(&self, content: &ResultContent<'_>, _format: &str, dest: &Path) -> Result<()> {
            std::fs::write(dest, content.result.name.as_bytes())?;
            Ok(())
        }
    }

    fn result(name: &str) -> AnalysisResult {
        AnalysisResult::new(name, name, DataRef::Single("obj-1".to_string()), "json")
    }

    fn registry() -> ExtractorRegistry {
        let mut registry = ExtractorRegistry::new();
        registry.register("demo", "speed", Arc::new(Echo));
        registry
    }

    #[test]
    fn test_registry_dispatches_by_type_and_name() {
        let paths = BTreeMap::new();
        let speed = result("speed");
        let params = serde_json::Value::Null;
        let content = ResultContent::new(&paths, &speed, &params);

        let value = registry().extract_feature("demo", &content).unwrap();
        assert_eq!(value["name"], "speed");

        assert!(matches!(
            registry().extract_feature("other", &content),
            Err(CitysimError::UnsupportedOperation { .. })
        ));
    }

    #[test]
    fn test_missing_delta_is_unsupported() {
        let paths = BTreeMap::new();
        let speed = result("speed");
        let params = serde_json::Value::Null;
        let content = ResultContent::new(&paths, &speed, &params);

        assert!(matches!(
            registry().extract_delta_feature("demo", &content, &content),
            Err(CitysimError::UnsupportedOperation { .. })
        ));
    }

    #[test]
    fn test_unsupported_format_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let paths = BTreeMap::new();
        let speed = result("speed");
        let params = serde_json::Value::Null;
        let content = ResultContent::new(&paths, &speed, &params);
        let dest = dir.path().join("speed.tif");

        let err = registry()
            .export_feature("demo", &content, "geotiff", &dest)
            .unwrap_err();
        assert!(matches!(err, CitysimError::UnsupportedFormat { .. }));
        assert!(!dest.exists());

        registry()
            .export_feature("demo", &content, "json", &dir.path().join("speed.json"))
            .unwrap();
    }

    #[test]
    fn test_primary_path_prefers_default_part() {
        let paths = BTreeMap::from([
            ("a".to_string(), PathBuf::from("/tmp/a.json")),
            ("default".to_string(), PathBuf::from("/tmp/d.json")),
        ]);
        let speed = result("speed");
        let params = serde_json::Value::Null;
        let content = ResultContent::new(&paths, &speed, &params);

        assert_eq!(content.primary_path().unwrap(), Path::new("/tmp/d.json"));

        let empty = BTreeMap::new();
        assert!(ResultContent::new(&empty, &speed, &params).primary_path().is_err());
    }
}
