mod request;
mod response;

pub use request::{CreateGroupRequest, CreateSceneRequest, SubmitRunRequest};
pub use response::{ConfigEntry, DeleteResponse, HealthResponse, RunResponse};
