//! Entry points for transport events
//!
//! Registration events land in the directory; method calls land in the
//! object manager. Every failure comes back as a well-formed response.

use coapbridge_core::{BridgeError, Node, NodeId, RequestCode, RequestMessage, ResponseMessage};
use std::sync::Arc;
use tracing::debug;

use crate::directory::ResourceDirectory;
use crate::object_manager::ObjectManager;

/// Ties the resource directory and the object manager together
#[derive(Clone)]
pub struct Bridge {
    directory: Arc<ResourceDirectory>,
    objects: Arc<ObjectManager>,
}

impl Bridge {
    pub fn new(directory: Arc<ResourceDirectory>, objects: Arc<ObjectManager>) -> Self {
        Self { directory, objects }
    }

    pub fn directory(&self) -> &Arc<ResourceDirectory> {
        &self.directory
    }

    pub fn objects(&self) -> &Arc<ObjectManager> {
        &self.objects
    }

    /// A node registered (or re-registered) with its resource paths
    pub fn on_node_registered(
        &self,
        node_id: &NodeId,
        context: &str,
        lifetime_secs: u64,
        paths: &[String],
    ) -> Node {
        let node = self.directory.register_node(node_id, context, lifetime_secs);
        for path in paths {
            self.directory.add_entry(&node, path);
        }
        node
    }

    /// A resource subtree went away
    pub fn on_node_or_resource_removed(&self, prefix: &str) -> Vec<String> {
        self.directory.remove_resources_under(prefix)
    }

    /// A node deregistered
    pub fn on_node_removed(&self, node_id: &NodeId) -> Vec<String> {
        self.directory.remove_node(node_id)
    }

    /// A bus caller invoked the object at `path`
    pub async fn on_method_call(
        &self,
        path: &str,
        code: RequestCode,
        message: &RequestMessage,
    ) -> ResponseMessage {
        if !self.objects.is_mirrored(path) && self.directory.owner_of(path).is_some() {
            debug!(path = %path, "Method call before mirror registration completed");
            return BridgeError::NotYetMirrored(path.to_string()).into_response();
        }

        match self.objects.handle_method_call(path, code, message).await {
            Ok(response) => response,
            Err(e) => {
                debug!(path = %path, error = %e, "Method call rejected");
                e.into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::DirectoryEvent;
    use crate::object_manager::tests::{connected_bus, RecordingProxy};
    use async_trait::async_trait;
    use coapbridge_core::{Proxy, ProxyError, ProxyRequest, ProxyResponse, ResponseCode};
    use tokio::sync::mpsc;

    fn bridge(
        proxy: Arc<RecordingProxy>,
    ) -> (Bridge, mpsc::UnboundedReceiver<DirectoryEvent>) {
        let (directory, events) = ResourceDirectory::new(86400);
        let objects = ObjectManager::new(connected_bus(), proxy, "com.bridge.coap");
        (Bridge::new(Arc::new(directory), Arc::new(objects)), events)
    }

    #[tokio::test]
    async fn test_end_to_end_registration_and_call() {
        let mut upstream = ProxyResponse::new(ResponseCode::CONTENT);
        upstream.payload = Some(b"21.5".to_vec());
        let proxy = RecordingProxy::answering(upstream.clone());
        let (bridge, mut events) = bridge(proxy.clone());

        bridge.on_node_registered(
            &NodeId::from("node42"),
            "coap://10.0.0.5",
            86400,
            &["/sensors/temp".to_string()],
        );
        assert_eq!(bridge.objects().drain(&mut events), 1);

        let directory = bridge.directory();
        assert_eq!(directory.owner_of("/sensors/temp"), Some(NodeId::from("node42")));
        assert_eq!(
            directory.get_context(&NodeId::from("node42")).as_deref(),
            Some("coap://10.0.0.5")
        );
        assert!(bridge.objects().is_mirrored("/sensors/temp"));

        let reply = bridge
            .on_method_call("/sensors/temp", RequestCode::Get, &RequestMessage::new())
            .await;
        assert_eq!(reply.code, upstream.code);
        assert_eq!(reply.payload, upstream.payload);

        let requests = proxy.requests.lock().unwrap();
        assert_eq!(requests[0].code, RequestCode::Get);
        assert_eq!(requests[0].options.uri_query, "");
        assert_eq!(requests[0].payload, None);
    }

    #[tokio::test]
    async fn test_call_before_mirror_is_unavailable() {
        let proxy = RecordingProxy::answering(ProxyResponse::new(ResponseCode::CONTENT));
        let (bridge, mut events) = bridge(proxy.clone());

        bridge.on_node_registered(
            &NodeId::from("node42"),
            "coap://10.0.0.5",
            86400,
            &["/sensors/temp".to_string()],
        );

        let reply = bridge
            .on_method_call("/sensors/temp", RequestCode::Get, &RequestMessage::new())
            .await;
        assert_eq!(reply.code, ResponseCode::SERVICE_UNAVAILABLE);
        assert!(proxy.requests.lock().unwrap().is_empty());

        bridge.objects().drain(&mut events);
        let reply = bridge
            .on_method_call("/sensors/temp", RequestCode::Get, &RequestMessage::new())
            .await;
        assert_eq!(reply.code, ResponseCode::CONTENT);
    }

    /// Proxy whose node has already left the directory
    struct DepartedNodeProxy;

    #[async_trait]
    impl Proxy for DepartedNodeProxy {
        async fn exchange(&self, request: ProxyRequest) -> Result<ProxyResponse, ProxyError> {
            Err(ProxyError::NoContext(request.path))
        }
    }

    #[tokio::test]
    async fn test_call_racing_node_removal_is_not_found() {
        let (directory, mut events) = ResourceDirectory::new(86400);
        let objects = ObjectManager::new(connected_bus(), Arc::new(DepartedNodeProxy), "com.bridge.coap");
        let bridge = Bridge::new(Arc::new(directory), Arc::new(objects));

        bridge.on_node_registered(
            &NodeId::from("node42"),
            "coap://10.0.0.5",
            86400,
            &["/sensors/temp".to_string()],
        );
        bridge.objects().drain(&mut events);

        let reply = bridge
            .on_method_call("/sensors/temp", RequestCode::Get, &RequestMessage::new())
            .await;
        assert_eq!(reply.code, ResponseCode::NOT_FOUND);
        assert!(bridge.objects().is_mirrored("/sensors/temp"));
    }

    #[tokio::test]
    async fn test_call_on_unregistered_path_is_not_found() {
        let (bridge, _events) = bridge(RecordingProxy::timing_out());
        let reply = bridge
            .on_method_call("/nowhere", RequestCode::Get, &RequestMessage::new())
            .await;
        assert_eq!(reply.code, ResponseCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_removal_unmirrors() {
        let (bridge, mut events) = bridge(RecordingProxy::timing_out());
        let paths = vec!["/node42/temp".to_string(), "/node42/light".to_string()];
        bridge.on_node_registered(&NodeId::from("node42"), "coap://10.0.0.5", 60, &paths);
        bridge.on_node_registered(
            &NodeId::from("node7"),
            "coap://10.0.0.7",
            60,
            &["/node7/temp".to_string()],
        );
        bridge.objects().drain(&mut events);

        bridge.on_node_or_resource_removed("/node42");
        bridge.objects().drain(&mut events);
        let mirrored: Vec<String> = bridge.objects().list_objects().into_iter().map(|o| o.path).collect();
        assert_eq!(mirrored, vec!["/node7/temp"]);

        bridge.on_node_removed(&NodeId::from("node7"));
        bridge.objects().drain(&mut events);
        assert!(bridge.objects().list_objects().is_empty());
        assert!(bridge.directory().list_contexts().iter().all(|n| n.id.as_str() == "node42"));

        let reply = bridge
            .on_method_call("/node7/temp", RequestCode::Get, &RequestMessage::new())
            .await;
        assert_eq!(reply.code, ResponseCode::NOT_FOUND);
    }
}
