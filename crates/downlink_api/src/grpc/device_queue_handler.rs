use std::sync::Arc;

use common::auth::{
    extract_user_context, require_access, AccessValidator, AuthTokenProvider, Operation, Resource,
};
use common::grpc::domain_error_to_status;
use lpwan_proto::api::v1::device_queue_service_server::DeviceQueueService as DeviceQueueServiceTrait;
use lpwan_proto::api::v1::{
    DeviceQueueItem, EnqueueDeviceQueueItemRequest, EnqueueDeviceQueueItemResponse,
    FlushDeviceQueueRequest, FlushDeviceQueueResponse, ListDeviceQueueItemsRequest,
    ListDeviceQueueItemsResponse,
};
use tonic::{Request, Response, Status};
use tracing::{debug, instrument};

use crate::domain::{DeviceQueueEntry, DeviceQueueService, DownlinkPayload, EnqueueDeviceQueueItem};
use crate::grpc::parse_dev_eui;

pub struct DeviceQueueServiceHandler {
    domain_service: Arc<DeviceQueueService>,
    auth_token_provider: Arc<dyn AuthTokenProvider>,
    access_validator: Arc<dyn AccessValidator>,
}

impl DeviceQueueServiceHandler {
    pub fn new(
        domain_service: Arc<DeviceQueueService>,
        auth_token_provider: Arc<dyn AuthTokenProvider>,
        access_validator: Arc<dyn AccessValidator>,
    ) -> Self {
        Self {
            domain_service,
            auth_token_provider,
            access_validator,
        }
    }
}

/// A non-empty `json_object` takes precedence over `data`.
fn payload_from_proto(item: &mut DeviceQueueItem) -> Result<DownlinkPayload, Status> {
    if item.json_object.is_empty() {
        return Ok(DownlinkPayload::Data(std::mem::take(&mut item.data)));
    }
    serde_json::from_str(&item.json_object)
        .map(DownlinkPayload::Object)
        .map_err(|e| Status::invalid_argument(format!("invalid json_object: {}", e)))
}

fn to_proto_item(entry: DeviceQueueEntry) -> DeviceQueueItem {
    DeviceQueueItem {
        dev_eui: entry.dev_eui.to_string(),
        confirmed: entry.confirmed,
        f_cnt: entry.f_cnt,
        f_port: entry.f_port as u32,
        data: entry.data,
        json_object: entry
            .object
            .map(|object| object.to_string())
            .unwrap_or_default(),
    }
}

#[tonic::async_trait]
impl DeviceQueueServiceTrait for DeviceQueueServiceHandler {
    #[instrument(
        name = "EnqueueDeviceQueueItem",
        skip(self, request),
        fields(dev_eui = tracing::field::Empty)
    )]
    async fn enqueue(
        &self,
        request: Request<EnqueueDeviceQueueItemRequest>,
    ) -> Result<Response<EnqueueDeviceQueueItemResponse>, Status> {
        let user_context = extract_user_context(&request, self.auth_token_provider.as_ref())?;
        let mut item = request
            .into_inner()
            .device_queue_item
            .ok_or_else(|| Status::invalid_argument("device_queue_item expected"))?;

        let dev_eui = parse_dev_eui(&item.dev_eui)?;
        tracing::Span::current().record("dev_eui", tracing::field::display(dev_eui));

        require_access(
            self.access_validator.as_ref(),
            user_context.user_id,
            Operation::Create,
            Resource::Device(dev_eui),
        )
        .await
        .map_err(domain_error_to_status)?;

        let payload = payload_from_proto(&mut item)?;
        let f_cnt = self
            .domain_service
            .enqueue(EnqueueDeviceQueueItem {
                dev_eui,
                confirmed: item.confirmed,
                f_port: item.f_port,
                payload,
            })
            .await
            .map_err(domain_error_to_status)?;

        debug!(f_cnt, "device queue item enqueued");
        Ok(Response::new(EnqueueDeviceQueueItemResponse { f_cnt }))
    }

    #[instrument(
        name = "FlushDeviceQueue",
        skip(self, request),
        fields(dev_eui = %request.get_ref().dev_eui)
    )]
    async fn flush(
        &self,
        request: Request<FlushDeviceQueueRequest>,
    ) -> Result<Response<FlushDeviceQueueResponse>, Status> {
        let user_context = extract_user_context(&request, self.auth_token_provider.as_ref())?;
        let dev_eui = parse_dev_eui(&request.get_ref().dev_eui)?;

        require_access(
            self.access_validator.as_ref(),
            user_context.user_id,
            Operation::Update,
            Resource::Device(dev_eui),
        )
        .await
        .map_err(domain_error_to_status)?;

        self.domain_service
            .flush(dev_eui)
            .await
            .map_err(domain_error_to_status)?;

        Ok(Response::new(FlushDeviceQueueResponse {}))
    }

    #[instrument(
        name = "ListDeviceQueueItems",
        skip(self, request),
        fields(dev_eui = %request.get_ref().dev_eui)
    )]
    async fn list(
        &self,
        request: Request<ListDeviceQueueItemsRequest>,
    ) -> Result<Response<ListDeviceQueueItemsResponse>, Status> {
        let user_context = extract_user_context(&request, self.auth_token_provider.as_ref())?;
        let req = request.into_inner();
        let dev_eui = parse_dev_eui(&req.dev_eui)?;

        require_access(
            self.access_validator.as_ref(),
            user_context.user_id,
            Operation::List,
            Resource::Device(dev_eui),
        )
        .await
        .map_err(domain_error_to_status)?;

        let entries = self
            .domain_service
            .list(dev_eui)
            .await
            .map_err(domain_error_to_status)?;

        let total_count = entries.len() as u32;
        let device_queue_items = if req.count_only {
            Vec::new()
        } else {
            entries.into_iter().map(to_proto_item).collect()
        };

        Ok(Response::new(ListDeviceQueueItemsResponse {
            device_queue_items,
            total_count,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::auth::{MockAccessValidator, MockAuthTokenProvider};
    use common::domain::{
        MockApplicationRepository, MockDeviceRepository, MockNetworkServerRepository,
    };
    use common::network_server::MockNetworkServerPool;

    fn auth_provider() -> MockAuthTokenProvider {
        let mut provider = MockAuthTokenProvider::new();
        provider.expect_validate_token().returning(|_| Ok(7));
        provider
    }

    fn validator(allowed: bool) -> MockAccessValidator {
        let mut validator = MockAccessValidator::new();
        validator
            .expect_validate()
            .returning(move |_, _, _| Ok(allowed));
        validator
    }

    fn handler(device_repo: MockDeviceRepository, allowed: bool) -> DeviceQueueServiceHandler {
        let service = DeviceQueueService::new(
            Arc::new(device_repo),
            Arc::new(MockApplicationRepository::new()),
            Arc::new(MockNetworkServerRepository::new()),
            Arc::new(MockNetworkServerPool::new()),
        );
        DeviceQueueServiceHandler::new(
            Arc::new(service),
            Arc::new(auth_provider()),
            Arc::new(validator(allowed)),
        )
    }

    fn authed<T>(message: T) -> Request<T> {
        let mut request = Request::new(message);
        request
            .metadata_mut()
            .insert("authorization", "Bearer token".parse().unwrap());
        request
    }

    fn item(dev_eui: &str) -> DeviceQueueItem {
        DeviceQueueItem {
            dev_eui: dev_eui.to_string(),
            confirmed: false,
            f_cnt: 0,
            f_port: 10,
            data: vec![1, 2, 3],
            json_object: String::new(),
        }
    }

    #[test]
    fn test_payload_from_proto_prefers_json_object() {
        let mut item = item("0102030405060708");
        item.json_object = r#"{"on":true}"#.to_string();
        assert_eq!(
            payload_from_proto(&mut item).unwrap(),
            DownlinkPayload::Object(serde_json::json!({"on": true}))
        );

        let mut item = item;
        item.json_object = "{".to_string();
        assert_eq!(
            payload_from_proto(&mut item).unwrap_err().code(),
            tonic::Code::InvalidArgument
        );
    }

    #[test]
    fn test_payload_from_proto_raw_data() {
        let mut item = item("0102030405060708");
        assert_eq!(
            payload_from_proto(&mut item).unwrap(),
            DownlinkPayload::Data(vec![1, 2, 3])
        );
    }

    #[tokio::test]
    async fn test_enqueue_requires_authentication() {
        let handler = handler(MockDeviceRepository::new(), true);
        let request = Request::new(EnqueueDeviceQueueItemRequest {
            device_queue_item: Some(item("0102030405060708")),
        });

        let status = handler.enqueue(request).await.unwrap_err();
        assert_eq!(status.code(), tonic::Code::Unauthenticated);
    }

    #[tokio::test]
    async fn test_enqueue_invalid_dev_eui() {
        let handler = handler(MockDeviceRepository::new(), true);
        let request = authed(EnqueueDeviceQueueItemRequest {
            device_queue_item: Some(item("zz")),
        });

        let status = handler.enqueue(request).await.unwrap_err();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);
    }

    #[tokio::test]
    async fn test_enqueue_missing_item() {
        let handler = handler(MockDeviceRepository::new(), true);
        let request = authed(EnqueueDeviceQueueItemRequest {
            device_queue_item: None,
        });

        let status = handler.enqueue(request).await.unwrap_err();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);
    }

    #[tokio::test]
    async fn test_enqueue_permission_denied() {
        let mut device_repo = MockDeviceRepository::new();
        device_repo.expect_lock_device().never();
        let handler = handler(device_repo, false);
        let request = authed(EnqueueDeviceQueueItemRequest {
            device_queue_item: Some(item("0102030405060708")),
        });

        let status = handler.enqueue(request).await.unwrap_err();
        assert_eq!(status.code(), tonic::Code::PermissionDenied);
    }

    #[tokio::test]
    async fn test_enqueue_device_not_found() {
        let mut device_repo = MockDeviceRepository::new();
        device_repo
            .expect_lock_device()
            .return_once(|_| Ok(None));
        let handler = handler(device_repo, true);
        let request = authed(EnqueueDeviceQueueItemRequest {
            device_queue_item: Some(item("0102030405060708")),
        });

        let status = handler.enqueue(request).await.unwrap_err();
        assert_eq!(status.code(), tonic::Code::NotFound);
    }

    #[tokio::test]
    async fn test_flush_device_not_found() {
        let mut device_repo = MockDeviceRepository::new();
        device_repo.expect_get_device().return_once(|_| Ok(None));
        let handler = handler(device_repo, true);
        let request = authed(FlushDeviceQueueRequest {
            dev_eui: "0102030405060708".to_string(),
        });

        let status = handler.flush(request).await.unwrap_err();
        assert_eq!(status.code(), tonic::Code::NotFound);
    }
}
