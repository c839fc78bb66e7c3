use serde::{Deserialize, Serialize};

/// Whether a job type is served by a long-lived inference container or run as a training job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Inference,
    Training,
}

/// The model server framework baked into a job type's image.
///
/// It decides both the health predicate and the shape of prediction payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Framework {
    Pytorch,
    Tensorflow,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HttpMethod {
    #[default]
    Post,
    Get,
}

/// Descriptor of a runnable job type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobTypeSpec {
    #[serde(rename = "type")]
    pub kind: JobKind,
    #[serde(rename = "imagePath")]
    pub image: String,
    #[serde(default)]
    pub framework: Option<Framework>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub api_path: Option<String>,
    #[serde(default)]
    pub health_check_path: Option<String>,
    #[serde(default)]
    pub method: HttpMethod,
}
