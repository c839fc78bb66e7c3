//! HTTP client of the model server running inside the inference container.

use comms::specs::{Framework, HttpMethod, InferenceData, JobTypeSpec};
use log::debug;
use reqwest::Method;
use serde_json::{Value, json};

use crate::{Result, WorkerErr, probe::is_healthy};

/// Decodes the submitted input vector, dropping the `'` quoting some clients add.
pub fn parse_input_vector(raw: &str) -> Result<Value> {
    serde_json::from_str(&raw.replace('\'', ""))
        .map_err(|e| WorkerErr::InvalidRequest(format!("malformed inputVector: {e}")))
}

/// Request body the framework's predict endpoint expects.
pub fn predict_payload(framework: Framework, data: &InferenceData) -> Result<Value> {
    let input = parse_input_vector(&data.input_vector)?;
    Ok(match framework {
        Framework::Tensorflow => json!({
            "signature_name": "predict",
            "instances": [input],
        }),
        Framework::Pytorch => json!({
            "num_samples": data.num_results_request,
            "length": data.length,
            "text": input,
        }),
    })
}

/// Normalizes a predict response into the published `{predictions}` record.
pub fn shape_result(framework: Framework, body: Value) -> Value {
    let predictions = match framework {
        Framework::Tensorflow => body.get("predictions").cloned().unwrap_or(Value::Null),
        Framework::Pytorch => body,
    };
    json!({ "predictions": predictions.to_string() })
}

pub struct WorkloadClient {
    http: reqwest::Client,
    base_url: String,
    framework: Framework,
    method: Method,
    api_path: String,
    health_path: String,
}

impl WorkloadClient {
    /// Builds a client for the servable job type `spec` published on `base_url`.
    pub fn new(base_url: impl Into<String>, spec: &JobTypeSpec) -> Result<Self> {
        let (Some(framework), Some(api_path), Some(health_path)) = (
            spec.framework,
            spec.api_path.clone(),
            spec.health_check_path.clone(),
        ) else {
            return Err(WorkerErr::Config(format!(
                "{} is missing a framework, api path or health path",
                spec.image
            )));
        };

        let method = match spec.method {
            HttpMethod::Post => Method::POST,
            HttpMethod::Get => Method::GET,
        };

        Ok(Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            framework,
            method,
            api_path,
            health_path,
        })
    }

    pub async fn is_healthy(&self) -> bool {
        let url = format!("{}{}", self.base_url, self.health_path);
        let body = match self.http.get(url).send().await {
            Ok(resp) => resp.json::<Value>().await,
            Err(e) => Err(e),
        };

        match body {
            Ok(body) => is_healthy(self.framework, &body),
            Err(e) => {
                debug!("health probe failed: {e}");
                false
            }
        }
    }

    pub async fn predict(&self, data: &InferenceData) -> Result<Value> {
        let payload = predict_payload(self.framework, data)?;
        let url = format!("{}{}", self.base_url, self.api_path);

        let body: Value = self
            .http
            .request(self.method.clone(), url)
            .json(&payload)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(shape_result(self.framework, body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(input: &str) -> InferenceData {
        InferenceData {
            input_vector: input.into(),
            num_results_request: Some(2),
            length: Some(30),
            requested_at: 0,
        }
    }

    #[test]
    fn quoted_inputs_are_unquoted() {
        assert_eq!(parse_input_vector("'\"hello\"'").unwrap(), json!("hello"));
        assert!(matches!(
            parse_input_vector("not json"),
            Err(WorkerErr::InvalidRequest(_))
        ));
    }

    #[test]
    fn framework_payloads() {
        assert_eq!(
            predict_payload(Framework::Tensorflow, &data("[1, 2]")).unwrap(),
            json!({ "signature_name": "predict", "instances": [[1, 2]] })
        );
        assert_eq!(
            predict_payload(Framework::Pytorch, &data("\"once upon\"")).unwrap(),
            json!({ "num_samples": 2, "length": 30, "text": "once upon" })
        );
    }

    #[test]
    fn predictions_are_published_as_json_text() {
        assert_eq!(
            shape_result(Framework::Tensorflow, json!({ "predictions": [[0.1]] })),
            json!({ "predictions": "[[0.1]]" })
        );
        assert_eq!(
            shape_result(Framework::Pytorch, json!(["a", "b"])),
            json!({ "predictions": "[\"a\",\"b\"]" })
        );
    }
}
