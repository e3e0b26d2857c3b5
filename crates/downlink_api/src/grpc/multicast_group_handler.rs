use std::sync::Arc;

use common::auth::{
    extract_user_context, require_access, AccessValidator, AuthTokenProvider, Operation, Resource,
    UserContext,
};
use common::grpc::domain_error_to_status;
use lpwan_proto::api::v1::multicast_group_service_server::MulticastGroupService as MulticastGroupServiceTrait;
use lpwan_proto::api::v1::{
    AddDeviceToMulticastGroupRequest, AddDeviceToMulticastGroupResponse,
    EnqueueMulticastQueueItemRequest, EnqueueMulticastQueueItemResponse,
    FlushMulticastGroupQueueItemsRequest, FlushMulticastGroupQueueItemsResponse,
    ListMulticastGroupQueueItemsRequest, ListMulticastGroupQueueItemsResponse, MulticastQueueItem,
    RemoveDeviceFromMulticastGroupRequest, RemoveDeviceFromMulticastGroupResponse,
};
use tonic::{Request, Response, Status};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::domain::MulticastService;
use crate::grpc::{parse_dev_eui, parse_uuid};

pub struct MulticastGroupServiceHandler {
    domain_service: Arc<MulticastService>,
    auth_token_provider: Arc<dyn AuthTokenProvider>,
    access_validator: Arc<dyn AccessValidator>,
}

impl MulticastGroupServiceHandler {
    pub fn new(
        domain_service: Arc<MulticastService>,
        auth_token_provider: Arc<dyn AuthTokenProvider>,
        access_validator: Arc<dyn AccessValidator>,
    ) -> Self {
        Self {
            domain_service,
            auth_token_provider,
            access_validator,
        }
    }

    async fn authorize(
        &self,
        user_context: UserContext,
        operation: Operation,
        id: Uuid,
    ) -> Result<(), Status> {
        require_access(
            self.access_validator.as_ref(),
            user_context.user_id,
            operation,
            Resource::MulticastGroup(id),
        )
        .await
        .map_err(domain_error_to_status)
    }
}

#[tonic::async_trait]
impl MulticastGroupServiceTrait for MulticastGroupServiceHandler {
    #[instrument(name = "EnqueueMulticastQueueItem", skip(self, request))]
    async fn enqueue(
        &self,
        request: Request<EnqueueMulticastQueueItemRequest>,
    ) -> Result<Response<EnqueueMulticastQueueItemResponse>, Status> {
        let user_context = extract_user_context(&request, self.auth_token_provider.as_ref())?;
        let item = request
            .into_inner()
            .multicast_queue_item
            .ok_or_else(|| Status::invalid_argument("multicast_queue_item expected"))?;
        let id = parse_uuid("multicast_group_id", &item.multicast_group_id)?;

        self.authorize(user_context, Operation::Create, id).await?;

        let f_cnt = self
            .domain_service
            .enqueue(id, item.f_port, item.data)
            .await
            .map_err(domain_error_to_status)?;

        debug!(multicast_group_id = %id, f_cnt, "multicast queue item enqueued");
        Ok(Response::new(EnqueueMulticastQueueItemResponse { f_cnt }))
    }

    #[instrument(
        name = "FlushMulticastGroupQueueItems",
        skip(self, request),
        fields(multicast_group_id = %request.get_ref().multicast_group_id)
    )]
    async fn flush_queue(
        &self,
        request: Request<FlushMulticastGroupQueueItemsRequest>,
    ) -> Result<Response<FlushMulticastGroupQueueItemsResponse>, Status> {
        let user_context = extract_user_context(&request, self.auth_token_provider.as_ref())?;
        let id = parse_uuid("multicast_group_id", &request.get_ref().multicast_group_id)?;

        self.authorize(user_context, Operation::Update, id).await?;

        self.domain_service
            .flush_queue(id)
            .await
            .map_err(domain_error_to_status)?;

        Ok(Response::new(FlushMulticastGroupQueueItemsResponse {}))
    }

    #[instrument(
        name = "ListMulticastGroupQueueItems",
        skip(self, request),
        fields(multicast_group_id = %request.get_ref().multicast_group_id)
    )]
    async fn list_queue(
        &self,
        request: Request<ListMulticastGroupQueueItemsRequest>,
    ) -> Result<Response<ListMulticastGroupQueueItemsResponse>, Status> {
        let user_context = extract_user_context(&request, self.auth_token_provider.as_ref())?;
        let id = parse_uuid("multicast_group_id", &request.get_ref().multicast_group_id)?;

        self.authorize(user_context, Operation::Read, id).await?;

        let entries = self
            .domain_service
            .list_queue(id)
            .await
            .map_err(domain_error_to_status)?;

        let multicast_queue_items = entries
            .into_iter()
            .map(|entry| MulticastQueueItem {
                multicast_group_id: entry.multicast_group_id.to_string(),
                f_cnt: entry.f_cnt,
                f_port: entry.f_port as u32,
                data: entry.data,
            })
            .collect();

        Ok(Response::new(ListMulticastGroupQueueItemsResponse {
            multicast_queue_items,
        }))
    }

    #[instrument(
        name = "AddDeviceToMulticastGroup",
        skip(self, request),
        fields(
            multicast_group_id = %request.get_ref().multicast_group_id,
            dev_eui = %request.get_ref().dev_eui,
        )
    )]
    async fn add_device(
        &self,
        request: Request<AddDeviceToMulticastGroupRequest>,
    ) -> Result<Response<AddDeviceToMulticastGroupResponse>, Status> {
        let user_context = extract_user_context(&request, self.auth_token_provider.as_ref())?;
        let req = request.into_inner();
        let id = parse_uuid("multicast_group_id", &req.multicast_group_id)?;
        let dev_eui = parse_dev_eui(&req.dev_eui)?;

        self.authorize(user_context, Operation::Update, id).await?;

        self.domain_service
            .add_device(id, dev_eui)
            .await
            .map_err(domain_error_to_status)?;

        Ok(Response::new(AddDeviceToMulticastGroupResponse {}))
    }

    #[instrument(
        name = "RemoveDeviceFromMulticastGroup",
        skip(self, request),
        fields(
            multicast_group_id = %request.get_ref().multicast_group_id,
            dev_eui = %request.get_ref().dev_eui,
        )
    )]
    async fn remove_device(
        &self,
        request: Request<RemoveDeviceFromMulticastGroupRequest>,
    ) -> Result<Response<RemoveDeviceFromMulticastGroupResponse>, Status> {
        let user_context = extract_user_context(&request, self.auth_token_provider.as_ref())?;
        let req = request.into_inner();
        let id = parse_uuid("multicast_group_id", &req.multicast_group_id)?;
        let dev_eui = parse_dev_eui(&req.dev_eui)?;

        self.authorize(user_context, Operation::Update, id).await?;

        self.domain_service
            .remove_device(id, dev_eui)
            .await
            .map_err(domain_error_to_status)?;

        Ok(Response::new(RemoveDeviceFromMulticastGroupResponse {}))
    }
}
