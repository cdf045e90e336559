//! Transport-neutral request handling.
//!
//! Maps `(method, path, body)` triples onto registry operations and produces
//! `{"success", "data", "uuid"?}` responses with an HTTP-style status code.
//! Any HTTP or RPC listener can sit in front of [`ComputeService::handle`].
//!
//! Routes:
//!
//! | Method       | Path                   | Operation           |
//! |--------------|------------------------|---------------------|
//! | `POST`       | `/create`              | create a session    |
//! | `GET`        | `/{id}`                | session info        |
//! | `PUT`        | `/update/{id}`         | bind input / outputs|
//! | `GET`/`POST` | `/compute/{id}`        | execute             |
//! | `GET`        | `/output/{id}/{index}` | read an output      |
//! | `DELETE`     | `/{id}`                | close               |

use crate::device::Device;
use crate::error::{Error, ErrorKind, Result};
use crate::reaper::SessionReaper;
use crate::registry::{SessionRegistry, SessionSpec};
use crate::session_id::SessionId;
use crate::types::{DataType, Elements};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl FromStr for Method {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "DELETE" => Ok(Method::Delete),
            other => Err(Error::validation(format!("unsupported method '{}'", other))),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        };
        f.write_str(name)
    }
}

/// One request as replayed from a script.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ServiceRequest {
    pub method: Method,
    pub path: String,
    #[serde(default)]
    pub body: Option<Value>,
}

/// Response body plus status code.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiResponse {
    #[serde(skip)]
    pub status: u16,
    pub success: bool,
    pub data: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
}

impl ApiResponse {
    pub fn ok(data: impl Into<Value>) -> Self {
        Self {
            status: 200,
            success: true,
            data: data.into(),
            uuid: None,
        }
    }

    pub fn failure(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            success: false,
            data: Value::String(message.into()),
            uuid: None,
        }
    }

    pub fn from_error(err: &Error) -> Self {
        Self::failure(status_for(err.kind()), err.to_string())
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Status code for an error kind.
pub fn status_for(kind: ErrorKind) -> u16 {
    match kind {
        ErrorKind::Validation | ErrorKind::TypeMismatch => 400,
        ErrorKind::NotFound => 404,
        ErrorKind::Compile => 422,
        ErrorKind::CapacityExceeded => 503,
        ErrorKind::Execution | ErrorKind::Internal => 500,
    }
}

/// Request façade over one [`SessionRegistry`].
///
/// Starts a [`SessionReaper`] when the registry has an idle timeout; it is
/// stopped when the service is dropped.
pub struct ComputeService<D: Device> {
    registry: Arc<SessionRegistry<D>>,
    _reaper: Option<SessionReaper>,
}

impl<D: Device> ComputeService<D> {
    pub fn new(registry: Arc<SessionRegistry<D>>) -> Result<Self> {
        let reaper = SessionReaper::spawn(&registry)?;
        Ok(Self {
            registry,
            _reaper: reaper,
        })
    }

    pub fn registry(&self) -> &Arc<SessionRegistry<D>> {
        &self.registry
    }

    /// Handle a raw request. `body` is the request text, if any.
    pub fn handle(&self, method: Method, path: &str, body: Option<&str>) -> ApiResponse {
        let body = match body.map(str::trim).filter(|b| !b.is_empty()) {
            Some(text) => match serde_json::from_str::<Value>(text) {
                Ok(value) => Some(value),
                Err(_) => return ApiResponse::failure(400, "Invalid JSON"),
            },
            None => None,
        };
        self.handle_value(method, path, body.as_ref())
    }

    pub fn handle_request(&self, request: &ServiceRequest) -> ApiResponse {
        self.handle_value(request.method, &request.path, request.body.as_ref())
    }

    /// Handle a request whose body is already parsed.
    pub fn handle_value(&self, method: Method, path: &str, body: Option<&Value>) -> ApiResponse {
        let response = self
            .route(method, path, body)
            .unwrap_or_else(|e| ApiResponse::from_error(&e));

        tracing::debug!(%method, path, status = response.status, "request handled");
        response
    }

    fn route(&self, method: Method, path: &str, body: Option<&Value>) -> Result<ApiResponse> {
        let segments: Vec<&str> = path.trim_matches('/').split('/').collect();

        match (method, segments.as_slice()) {
            (Method::Post, ["create"]) => self.create_kernel(require_body(body)?),
            (Method::Put, ["update", id]) => self.update_kernel(&SessionId::parse(id)?, require_body(body)?),
            (Method::Get | Method::Post, ["compute", id]) => self.compute(&SessionId::parse(id)?),
            (Method::Get, ["output", id, index]) => {
                let index = index
                    .parse::<usize>()
                    .map_err(|_| Error::validation("Invalid output index"))?;
                self.read_output(&SessionId::parse(id)?, index)
            }
            (Method::Get, [id]) if !id.is_empty() => self.kernel_info(&SessionId::parse(id)?),
            (Method::Delete, [id]) if !id.is_empty() => self.close_kernel(&SessionId::parse(id)?),
            _ => Ok(ApiResponse::failure(404, format!("Unknown route {} {}", method, path))),
        }
    }

    /// `POST /create`
    pub fn create_kernel(&self, body: &Value) -> Result<ApiResponse> {
        let source = body["source"]
            .as_str()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| Error::validation("Empty or missing kernel string"))?;

        let code = body["type"]
            .as_u64()
            .ok_or_else(|| Error::validation("Invalid data type"))?;
        let data_type = u32::try_from(code)
            .ok()
            .and_then(|c| DataType::try_from(c).ok())
            .ok_or_else(|| Error::validation("Unrecognized data type"))?;

        let outputs = parse_sizes(&body["outputs"], "Missing outputs")?;

        let mut spec = SessionSpec::new(source, data_type).outputs(outputs);
        match &body["entry_point"] {
            Value::Null => {}
            Value::String(name) => spec = spec.entry_point(name.as_str()),
            _ => return Err(Error::validation("Invalid entry point")),
        }

        let id = self.registry.create(spec)?;

        let mut response = ApiResponse::ok("Kernel created successfully");
        response.uuid = Some(id.into());
        Ok(response)
    }

    /// `GET /{id}`
    pub fn kernel_info(&self, id: &SessionId) -> Result<ApiResponse> {
        let info = self.registry.info(id)?;
        Ok(ApiResponse::ok(serde_json::to_value(info)?))
    }

    /// `PUT /update/{id}`
    pub fn update_kernel(&self, id: &SessionId, body: &Value) -> Result<ApiResponse> {
        let action = body["update"]
            .as_str()
            .ok_or_else(|| Error::validation("Empty or missing action"))?;

        match action {
            "input" => {
                let index = match &body["index"] {
                    Value::Null => None,
                    v => Some(
                        v.as_u64()
                            .and_then(|i| usize::try_from(i).ok())
                            .ok_or_else(|| Error::validation("Invalid index"))?,
                    ),
                };
                let values = body["data"]
                    .as_array()
                    .ok_or_else(|| Error::validation("Missing input data"))?;

                let data_type = self.registry.get(id)?.data_type();
                let elements = Elements::from_json(data_type, values)?;

                let index = match index {
                    Some(index) => self.registry.bind_input_at(id, index, elements)?,
                    None => self.registry.bind_input(id, elements)?,
                };
                Ok(ApiResponse::ok(json!({ "index": index })))
            }
            "outputs" => {
                let sizes = parse_sizes(&body["outputs"], "Missing outputs")?;
                self.registry.set_output_specs(id, sizes)?;
                Ok(ApiResponse::ok("Outputs updated successfully"))
            }
            _ => Err(Error::validation("Unrecognized update action")),
        }
    }

    /// `GET|POST /compute/{id}`
    pub fn compute(&self, id: &SessionId) -> Result<ApiResponse> {
        self.registry.execute(id)?;
        Ok(ApiResponse::ok("Kernel executed successfully"))
    }

    /// `GET /output/{id}/{index}`
    pub fn read_output(&self, id: &SessionId, index: usize) -> Result<ApiResponse> {
        let elements = self.registry.read_output(id, index)?;
        Ok(ApiResponse::ok(serde_json::to_value(elements)?))
    }

    /// `DELETE /{id}`
    pub fn close_kernel(&self, id: &SessionId) -> Result<ApiResponse> {
        self.registry.close(id)?;
        Ok(ApiResponse::ok("Kernel deleted"))
    }
}

impl<D: Device> fmt::Debug for ComputeService<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputeService")
            .field("registry", &self.registry)
            .field("reaper", &self._reaper.is_some())
            .finish()
    }
}

fn require_body(body: Option<&Value>) -> Result<&Value> {
    body.filter(|b| b.is_object())
        .ok_or_else(|| Error::validation("Invalid JSON"))
}

fn parse_sizes(value: &Value, missing: &str) -> Result<Vec<u64>> {
    value
        .as_array()
        .ok_or_else(|| Error::validation(missing))?
        .iter()
        .map(|v| {
            v.as_u64()
                .ok_or_else(|| Error::validation("Outputs is not a list of integers"))
        })
        .collect()
}
