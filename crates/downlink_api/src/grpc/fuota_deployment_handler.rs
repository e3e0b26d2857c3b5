use std::sync::Arc;
use std::time::Duration;

use common::auth::{
    extract_user_context, require_access, AccessValidator, AuthTokenProvider, Operation, Resource,
};
use common::domain::{
    FuotaDeployment as DomainFuotaDeployment, FuotaDeploymentDevice,
    FuotaDeploymentDeviceState as DomainDeviceState, FuotaDeploymentFilters,
    FuotaDeploymentListItem as DomainListItem, MulticastGroupType as DomainGroupType,
};
use common::grpc::domain_error_to_status;
use lpwan_proto::api::v1::fuota_deployment_service_server::FuotaDeploymentService as FuotaDeploymentServiceTrait;
use lpwan_proto::api::v1::{
    CreateFuotaDeploymentForDeviceRequest, CreateFuotaDeploymentForDeviceResponse, FuotaDeployment,
    FuotaDeploymentDeviceListItem, FuotaDeploymentDeviceState, FuotaDeploymentListItem,
    GetFuotaDeploymentDeviceRequest, GetFuotaDeploymentDeviceResponse, GetFuotaDeploymentRequest,
    GetFuotaDeploymentResponse, ListFuotaDeploymentDevicesRequest,
    ListFuotaDeploymentDevicesResponse, ListFuotaDeploymentRequest, ListFuotaDeploymentResponse,
    MulticastGroupType,
};
use tonic::{Request, Response, Status};
use tracing::{debug, instrument};

use crate::domain::{CreateFuotaDeploymentForDevice, FuotaDeploymentService};
use crate::grpc::{parse_dev_eui, parse_uuid, to_timestamp};

pub struct FuotaDeploymentServiceHandler {
    domain_service: Arc<FuotaDeploymentService>,
    auth_token_provider: Arc<dyn AuthTokenProvider>,
    access_validator: Arc<dyn AccessValidator>,
}

impl FuotaDeploymentServiceHandler {
    pub fn new(
        domain_service: Arc<FuotaDeploymentService>,
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
        user_id: i64,
        operation: Operation,
        resource: Resource,
    ) -> Result<(), Status> {
        require_access(self.access_validator.as_ref(), user_id, operation, resource)
            .await
            .map_err(domain_error_to_status)
    }
}

fn group_type_from_proto(group_type: MulticastGroupType) -> DomainGroupType {
    match group_type {
        MulticastGroupType::ClassC => DomainGroupType::ClassC,
        MulticastGroupType::ClassB => DomainGroupType::ClassB,
    }
}

fn group_type_to_proto(group_type: DomainGroupType) -> MulticastGroupType {
    match group_type {
        DomainGroupType::ClassC => MulticastGroupType::ClassC,
        DomainGroupType::ClassB => MulticastGroupType::ClassB,
    }
}

fn device_state_to_proto(state: DomainDeviceState) -> FuotaDeploymentDeviceState {
    match state {
        DomainDeviceState::Pending => FuotaDeploymentDeviceState::Pending,
        DomainDeviceState::Success => FuotaDeploymentDeviceState::Success,
        DomainDeviceState::Error => FuotaDeploymentDeviceState::Error,
    }
}

fn to_proto_deployment(deployment: DomainFuotaDeployment) -> FuotaDeployment {
    FuotaDeployment {
        id: deployment.id.to_string(),
        name: deployment.name,
        group_type: group_type_to_proto(deployment.group_type) as i32,
        dr: deployment.dr as u32,
        frequency: deployment.frequency,
        ping_slot_period: deployment.ping_slot_period,
        payload: deployment.payload,
        redundancy: deployment.redundancy as u32,
        multicast_timeout: deployment.multicast_timeout as u32,
        unicast_timeout: deployment.unicast_timeout.as_secs() as u32,
        state: deployment.state.to_string(),
        next_step_after: Some(to_timestamp(deployment.next_step_after)),
        frag_size: deployment.frag_size as u32,
        created_at: deployment.created_at.map(to_timestamp),
        updated_at: deployment.updated_at.map(to_timestamp),
    }
}

fn to_proto_list_item(item: DomainListItem) -> FuotaDeploymentListItem {
    FuotaDeploymentListItem {
        id: item.id.to_string(),
        name: item.name,
        state: item.state.to_string(),
        next_step_after: Some(to_timestamp(item.next_step_after)),
        created_at: item.created_at.map(to_timestamp),
        updated_at: item.updated_at.map(to_timestamp),
    }
}

fn to_proto_device(device: FuotaDeploymentDevice) -> FuotaDeploymentDeviceListItem {
    FuotaDeploymentDeviceListItem {
        dev_eui: device.dev_eui.to_string(),
        device_name: device.device_name,
        state: device_state_to_proto(device.state) as i32,
        error_message: device.error_message,
        created_at: device.created_at.map(to_timestamp),
        updated_at: device.updated_at.map(to_timestamp),
    }
}

#[tonic::async_trait]
impl FuotaDeploymentServiceTrait for FuotaDeploymentServiceHandler {
    #[instrument(
        name = "CreateFUOTADeploymentForDevice",
        skip(self, request),
        fields(dev_eui = %request.get_ref().dev_eui)
    )]
    async fn create_for_device(
        &self,
        request: Request<CreateFuotaDeploymentForDeviceRequest>,
    ) -> Result<Response<CreateFuotaDeploymentForDeviceResponse>, Status> {
        let user_context = extract_user_context(&request, self.auth_token_provider.as_ref())?;
        let req = request.into_inner();
        let dev_eui = parse_dev_eui(&req.dev_eui)?;
        let deployment = req
            .fuota_deployment
            .ok_or_else(|| Status::invalid_argument("fuota_deployment expected"))?;

        self.authorize(
            user_context.user_id,
            Operation::Update,
            Resource::Device(dev_eui),
        )
        .await?;

        let group_type = group_type_from_proto(deployment.group_type());
        let id = self
            .domain_service
            .create_for_device(CreateFuotaDeploymentForDevice {
                dev_eui,
                name: deployment.name,
                group_type,
                dr: deployment.dr,
                frequency: deployment.frequency,
                ping_slot_period: deployment.ping_slot_period,
                payload: deployment.payload,
                redundancy: deployment.redundancy,
                multicast_timeout: deployment.multicast_timeout,
                unicast_timeout: Duration::from_secs(deployment.unicast_timeout as u64),
            })
            .await
            .map_err(domain_error_to_status)?;

        debug!(deployment_id = %id, "FUOTA deployment created");
        Ok(Response::new(CreateFuotaDeploymentForDeviceResponse {
            id: id.to_string(),
        }))
    }

    #[instrument(
        name = "GetFUOTADeployment",
        skip(self, request),
        fields(deployment_id = %request.get_ref().id)
    )]
    async fn get(
        &self,
        request: Request<GetFuotaDeploymentRequest>,
    ) -> Result<Response<GetFuotaDeploymentResponse>, Status> {
        let user_context = extract_user_context(&request, self.auth_token_provider.as_ref())?;
        let id = parse_uuid("id", &request.get_ref().id)?;

        self.authorize(
            user_context.user_id,
            Operation::Read,
            Resource::FuotaDeployment(id),
        )
        .await?;

        let deployment = self
            .domain_service
            .get(id)
            .await
            .map_err(domain_error_to_status)?;

        Ok(Response::new(GetFuotaDeploymentResponse {
            fuota_deployment: Some(to_proto_deployment(deployment)),
        }))
    }

    #[instrument(name = "ListFUOTADeployment", skip(self, request))]
    async fn list(
        &self,
        request: Request<ListFuotaDeploymentRequest>,
    ) -> Result<Response<ListFuotaDeploymentResponse>, Status> {
        let user_context = extract_user_context(&request, self.auth_token_provider.as_ref())?;
        let req = request.into_inner();

        let filters = FuotaDeploymentFilters {
            dev_eui: if req.dev_eui.is_empty() {
                None
            } else {
                Some(parse_dev_eui(&req.dev_eui)?)
            },
            application_id: (req.application_id != 0).then_some(req.application_id),
            limit: req.limit,
            offset: req.offset,
        };

        // Without filters the listing spans organizations.
        if let Some(application_id) = filters.application_id {
            self.authorize(
                user_context.user_id,
                Operation::List,
                Resource::Application(application_id),
            )
            .await?;
        }
        if let Some(dev_eui) = filters.dev_eui {
            self.authorize(
                user_context.user_id,
                Operation::List,
                Resource::Device(dev_eui),
            )
            .await?;
        }
        if filters.application_id.is_none() && filters.dev_eui.is_none() {
            self.authorize(user_context.user_id, Operation::List, Resource::Global)
                .await?;
        }

        let page = self
            .domain_service
            .list(filters)
            .await
            .map_err(domain_error_to_status)?;

        Ok(Response::new(ListFuotaDeploymentResponse {
            total_count: page.total_count,
            result: page.items.into_iter().map(to_proto_list_item).collect(),
        }))
    }

    #[instrument(
        name = "GetFUOTADeploymentDevice",
        skip(self, request),
        fields(
            deployment_id = %request.get_ref().fuota_deployment_id,
            dev_eui = %request.get_ref().dev_eui,
        )
    )]
    async fn get_deployment_device(
        &self,
        request: Request<GetFuotaDeploymentDeviceRequest>,
    ) -> Result<Response<GetFuotaDeploymentDeviceResponse>, Status> {
        let user_context = extract_user_context(&request, self.auth_token_provider.as_ref())?;
        let req = request.into_inner();
        let id = parse_uuid("fuota_deployment_id", &req.fuota_deployment_id)?;
        let dev_eui = parse_dev_eui(&req.dev_eui)?;

        self.authorize(
            user_context.user_id,
            Operation::Read,
            Resource::FuotaDeployment(id),
        )
        .await?;

        let device = self
            .domain_service
            .get_deployment_device(id, dev_eui)
            .await
            .map_err(domain_error_to_status)?;

        Ok(Response::new(GetFuotaDeploymentDeviceResponse {
            deployment_device: Some(to_proto_device(device)),
        }))
    }

    #[instrument(
        name = "ListFUOTADeploymentDevices",
        skip(self, request),
        fields(deployment_id = %request.get_ref().fuota_deployment_id)
    )]
    async fn list_deployment_devices(
        &self,
        request: Request<ListFuotaDeploymentDevicesRequest>,
    ) -> Result<Response<ListFuotaDeploymentDevicesResponse>, Status> {
        let user_context = extract_user_context(&request, self.auth_token_provider.as_ref())?;
        let req = request.into_inner();
        let id = parse_uuid("fuota_deployment_id", &req.fuota_deployment_id)?;

        self.authorize(
            user_context.user_id,
            Operation::List,
            Resource::FuotaDeployment(id),
        )
        .await?;

        let page = self
            .domain_service
            .list_deployment_devices(id, req.limit, req.offset)
            .await
            .map_err(domain_error_to_status)?;

        Ok(Response::new(ListFuotaDeploymentDevicesResponse {
            total_count: page.total_count,
            result: page.items.into_iter().map(to_proto_device).collect(),
        }))
    }
}
