//! gNMI service backed by a NETCONF session.
//!
//! Each RPC is stateless: paths are resolved against the shared [`Schema`],
//! translated to NETCONF, executed on the session, and the reply mapped back
//! to gNMI values. NETCONF calls are serialized through a mutex around the
//! session.
//!
//! # Set semantics
//!
//! Deletes run first, then replaces, then updates, each as its own
//! `<edit-config>`. All fragments are built and validated before the first
//! call. A device failure stops processing, but edits already applied are
//! not rolled back; the device's `rollback-on-error` only covers the failing
//! edit itself.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tonic::{Request, Response, Status};
use tracing::{debug, warn};

use crate::decoder::decode;
use crate::error::{AdapterError, Result};
use crate::filter::{EditOperation, Encoder};
use crate::gnmi::g_nmi_server::GNmi;
use crate::gnmi::{
    CapabilityRequest, CapabilityResponse, Encoding, GetRequest, GetResponse, ModelData,
    Notification, Path, SetRequest, SetResponse, SubscribeRequest, SubscribeResponse, TypedValue,
    Update, UpdateResult, get_request, update_result,
};
use crate::path::{full_path, names, path_to_string};
use crate::schema::Schema;
use crate::session::{Datastore, NetconfOps};
use crate::value::{from_typed_value, navigate, to_typed_value};

/// gNMI version reported by Capabilities.
pub const GNMI_VERSION: &str = "0.7.0";

/// Translates gNMI requests into NETCONF operations on one device session.
pub struct Adapter<S> {
    schema: Arc<Schema>,
    session: Mutex<S>,
    encoder: Encoder,
    datastore: Datastore,
}

impl<S: NetconfOps> Adapter<S> {
    /// Create an adapter reading and writing the candidate datastore.
    pub fn new(schema: Arc<Schema>, session: S) -> Self {
        Self {
            schema,
            session: Mutex::new(session),
            encoder: Encoder::default(),
            datastore: Datastore::default(),
        }
    }

    /// Use `datastore` as get-config source and edit-config target.
    pub fn with_datastore(mut self, datastore: Datastore) -> Self {
        self.datastore = datastore;
        self
    }

    /// Attach `xmlns` attributes to the given element names.
    pub fn with_namespaces(mut self, namespaces: HashMap<String, String>) -> Self {
        self.encoder = Encoder::new(namespaces);
        self
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    fn supported_models(&self) -> Vec<ModelData> {
        self.schema
            .models()
            .iter()
            .map(|m| ModelData {
                name: m.name.clone(),
                organization: m.organization.clone(),
                version: m.version.clone(),
            })
            .collect()
    }

    fn capability_response(&self) -> CapabilityResponse {
        CapabilityResponse {
            supported_models: self.supported_models(),
            supported_encodings: vec![Encoding::Json as i32],
            g_nmi_version: GNMI_VERSION.to_string(),
            ..Default::default()
        }
    }

    fn check_get_request(&self, req: &GetRequest) -> Result<()> {
        if req.encoding != Encoding::Json as i32 {
            let name = Encoding::try_from(req.encoding)
                .map(|e| e.as_str_name())
                .unwrap_or("UNKNOWN");
            return Err(AdapterError::unimplemented(format!(
                "unsupported encoding: {}",
                name
            )));
        }

        let supported = self.supported_models();
        if let Some(model) = req.use_models.iter().find(|m| !supported.contains(m)) {
            return Err(AdapterError::unimplemented(format!(
                "unsupported model: name '{}', organization '{}', version '{}'",
                model.name, model.organization, model.version
            )));
        }

        if req.r#type == get_request::DataType::State as i32
            || req.r#type == get_request::DataType::Operational as i32
        {
            return Err(AdapterError::unimplemented(
                "only configuration data can be retrieved",
            ));
        }
        Ok(())
    }

    async fn get_paths(&self, req: &GetRequest) -> Result<GetResponse> {
        self.check_get_request(req)?;

        let mut notification = Vec::with_capacity(req.path.len());
        for path in &req.path {
            let val = self.get_path(req.prefix.as_ref(), path).await?;
            notification.push(Notification {
                timestamp: now_nanos(),
                prefix: req.prefix.clone(),
                update: vec![Update {
                    path: Some(path.clone()),
                    val: Some(val),
                    ..Default::default()
                }],
                ..Default::default()
            });
        }
        Ok(GetResponse {
            notification,
            ..Default::default()
        })
    }

    async fn get_path(&self, prefix: Option<&Path>, path: &Path) -> Result<TypedValue> {
        let elems = full_path(prefix, path)?;
        let shown = path_to_string(&elems);
        let entry = self
            .schema
            .entry_for_path(names(&elems))
            .ok_or_else(|| AdapterError::not_found(format!("path {} not in schema", shown)))?;

        let filter = self.encoder.build_get_filter(&elems)?;
        debug!(path = %shown, filter = ?filter, "get-config");

        let xml = {
            let mut session = self.session.lock().await;
            session
                .get_config_subtree(filter.as_deref(), self.datastore)
                .await
                .map_err(|e| AdapterError::unknown(format!("get-config failed: {}", e)))?
        };

        let tree = decode(&xml, &self.schema)?;
        let node = navigate(&tree, &elems)?;
        to_typed_value(node, entry, &self.schema)
    }

    /// Build the edit-config fragment for one Set sub-operation.
    fn edit_fragment(
        &self,
        op: EditOperation,
        prefix: Option<&Path>,
        path: &Path,
        val: Option<&TypedValue>,
    ) -> Result<String> {
        let elems = full_path(prefix, path)?;
        if elems.is_empty() {
            return Err(AdapterError::unimplemented(
                "editing the whole device configuration is not supported",
            ));
        }
        let entry = self.schema.entry_for_path(names(&elems)).ok_or_else(|| {
            AdapterError::not_found(format!("path {} not in schema", path_to_string(&elems)))
        })?;

        let value = match op {
            EditOperation::Delete => None,
            _ => {
                let val = val.ok_or_else(|| {
                    AdapterError::invalid_argument(format!(
                        "{} of {} carries no value",
                        op,
                        path_to_string(&elems)
                    ))
                })?;
                Some(from_typed_value(val, entry, &self.schema)?)
            }
        };
        self.encoder.build_edit_fragment(op, &elems, value.as_ref())
    }

    async fn set_paths(&self, req: &SetRequest) -> Result<SetResponse> {
        let prefix = req.prefix.as_ref();
        let mut edits = Vec::new();
        for path in &req.delete {
            let fragment = self.edit_fragment(EditOperation::Delete, prefix, path, None)?;
            edits.push((update_result::Operation::Delete, path.clone(), fragment));
        }
        for update in &req.replace {
            let path = update.path.clone().unwrap_or_default();
            let fragment =
                self.edit_fragment(EditOperation::Replace, prefix, &path, update.val.as_ref())?;
            edits.push((update_result::Operation::Replace, path, fragment));
        }
        for update in &req.update {
            let path = update.path.clone().unwrap_or_default();
            let fragment =
                self.edit_fragment(EditOperation::Merge, prefix, &path, update.val.as_ref())?;
            edits.push((update_result::Operation::Update, path, fragment));
        }

        let mut response = Vec::with_capacity(edits.len());
        let mut session = self.session.lock().await;
        for (op, path, fragment) in edits {
            debug!(op = ?op, config = %fragment, "edit-config");
            session
                .edit_config(self.datastore, &fragment)
                .await
                .map_err(|e| AdapterError::unknown(format!("edit-config failed: {}", e)))?;
            response.push(UpdateResult {
                path: Some(path),
                op: op as i32,
                ..Default::default()
            });
        }

        Ok(SetResponse {
            prefix: req.prefix.clone(),
            response,
            timestamp: now_nanos(),
            ..Default::default()
        })
    }
}

fn now_nanos() -> i64 {
    chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
}

fn log_failure(rpc: &str, err: AdapterError) -> Status {
    warn!(rpc, code = ?err.code(), error = %err, "request failed");
    err.into()
}

#[tonic::async_trait]
impl<S: NetconfOps + 'static> GNmi for Adapter<S> {
    async fn capabilities(
        &self,
        _request: Request<CapabilityRequest>,
    ) -> std::result::Result<Response<CapabilityResponse>, Status> {
        debug!("Capabilities");
        Ok(Response::new(self.capability_response()))
    }

    async fn get(
        &self,
        request: Request<GetRequest>,
    ) -> std::result::Result<Response<GetResponse>, Status> {
        let req = request.into_inner();
        debug!(paths = req.path.len(), "Get");
        self.get_paths(&req)
            .await
            .map(Response::new)
            .map_err(|e| log_failure("Get", e))
    }

    async fn set(
        &self,
        request: Request<SetRequest>,
    ) -> std::result::Result<Response<SetResponse>, Status> {
        let req = request.into_inner();
        debug!(
            deletes = req.delete.len(),
            replaces = req.replace.len(),
            updates = req.update.len(),
            "Set"
        );
        self.set_paths(&req)
            .await
            .map(Response::new)
            .map_err(|e| log_failure("Set", e))
    }

    type SubscribeStream = tokio_stream::Empty<std::result::Result<SubscribeResponse, Status>>;

    async fn subscribe(
        &self,
        _request: Request<tonic::Streaming<SubscribeRequest>>,
    ) -> std::result::Result<Response<Self::SubscribeStream>, Status> {
        debug!("Subscribe (no updates are streamed)");
        Ok(Response::new(tokio_stream::empty()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::parse_path;
    use crate::schema::tests::sample;
    use crate::session::mock::MockSession;

    fn adapter(session: MockSession) -> Adapter<MockSession> {
        Adapter::new(Arc::new(sample()), session)
    }

    #[test]
    fn test_capability_response() {
        let adapter = adapter(MockSession::new());
        let caps = adapter.capability_response();
        assert_eq!(caps.g_nmi_version, "0.7.0");
        assert_eq!(caps.supported_encodings, vec![Encoding::Json as i32]);
        assert_eq!(caps.supported_models.len(), adapter.schema().models().len());
    }

    #[test]
    fn test_check_get_request() {
        let adapter = adapter(MockSession::new());
        let ok = GetRequest::default();
        assert!(adapter.check_get_request(&ok).is_ok());

        let ietf = GetRequest {
            encoding: Encoding::JsonIetf as i32,
            ..Default::default()
        };
        assert!(matches!(
            adapter.check_get_request(&ietf),
            Err(AdapterError::Unimplemented(_))
        ));

        let state = GetRequest {
            r#type: get_request::DataType::State as i32,
            ..Default::default()
        };
        assert!(adapter.check_get_request(&state).is_err());

        let known = GetRequest {
            use_models: adapter.supported_models(),
            ..Default::default()
        };
        assert!(adapter.check_get_request(&known).is_ok());
    }

    #[tokio::test]
    async fn test_get_uses_configured_datastore() {
        let recorder = MockSession::new()
            .with_response("<configuration><version>ABC</version></configuration>");
        let adapter = adapter(recorder.clone()).with_datastore(Datastore::Running);
        let val = adapter
            .get_path(None, &parse_path("/configuration/version"))
            .await
            .unwrap();
        assert_eq!(
            val.value,
            Some(crate::gnmi::typed_value::Value::StringVal("ABC".to_string()))
        );
        assert_eq!(recorder.sources(), vec![Datastore::Running]);
    }

    #[tokio::test]
    async fn test_edit_fragment_with_namespaces() {
        let adapter = adapter(MockSession::new()).with_namespaces(HashMap::from([(
            "configuration".to_string(),
            "http://xml.juniper.net/xnm/1.1/xnm".to_string(),
        )]));
        let fragment = adapter
            .edit_fragment(
                EditOperation::Delete,
                None,
                &parse_path("/configuration/version"),
                None,
            )
            .unwrap();
        assert_eq!(
            fragment,
            "<configuration xmlns=\"http://xml.juniper.net/xnm/1.1/xnm\">\
             <version operation=\"delete\"></version></configuration>"
        );
    }
}
