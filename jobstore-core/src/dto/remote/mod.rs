//! Remote executor DTOs

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Body of `POST {base}/{name}/start`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteJob {
    pub name: String,
    /// Id of the job record on the coordinator side
    pub client_id: String,
    pub parameters: HashMap<String, String>,
}
