//! Limits gRPC service implementation.

use std::sync::Arc;
use tonic::{Request, Response, Status};
use tracing::{debug, info, instrument, warn};

use super::convert::fail_open_status;
use super::proto::v1::{
    limits_service_server::LimitsService, AdmissionRequest, ApplyRateLimitResponse,
    AttemptRateLimitResponse, CheckRateLimitResponse, CreateRateLimitRequest,
    DeleteRateLimitRequest, DeleteRateLimitResponse, GetRateLimitRequest, ListRateLimitsRequest,
    ListRateLimitsResponse, RateLimitRule as ProtoRule, UpdateRateLimitRequest,
};
use crate::ratelimit::{LimitsBackend, RateLimitFilter, RateLimitRule};

/// Implementation of the `ratelimiter.v1.LimitsService` gRPC interface.
pub struct LimitsServiceImpl<B: LimitsBackend> {
    backend: Arc<B>,
}

impl<B: LimitsBackend> LimitsServiceImpl<B> {
    /// Create a new service over the given backend.
    pub fn new(backend: Arc<B>) -> Self {
        Self { backend }
    }
}

fn rule_from_request(rule: Option<ProtoRule>) -> Result<RateLimitRule, Status> {
    let rule = rule.ok_or_else(|| Status::invalid_argument("rule is required"))?;
    Ok(RateLimitRule::try_from(rule)?)
}

fn validate_admission(request: &AdmissionRequest) -> Result<(), Status> {
    if request.rule_id.is_empty() {
        warn!("Received admission request with empty rule id");
        return Err(Status::invalid_argument("rule_id is required"));
    }
    if request.caller_id.is_empty() {
        warn!("Received admission request with empty caller id");
        return Err(Status::invalid_argument("caller_id is required"));
    }
    Ok(())
}

#[tonic::async_trait]
impl<B: LimitsBackend + 'static> LimitsService for LimitsServiceImpl<B> {
    #[instrument(skip(self, request))]
    async fn create_rate_limit(
        &self,
        request: Request<CreateRateLimitRequest>,
    ) -> Result<Response<ProtoRule>, Status> {
        let rule = rule_from_request(request.into_inner().rule)?;
        let created = self.backend.create_rate_limit(rule).await?;
        Ok(Response::new(created.into()))
    }

    #[instrument(skip(self, request), fields(id = %request.get_ref().id))]
    async fn get_rate_limit(
        &self,
        request: Request<GetRateLimitRequest>,
    ) -> Result<Response<ProtoRule>, Status> {
        let rule = self.backend.get_rate_limit(&request.get_ref().id).await?;
        Ok(Response::new(rule.into()))
    }

    #[instrument(skip(self, request))]
    async fn update_rate_limit(
        &self,
        request: Request<UpdateRateLimitRequest>,
    ) -> Result<Response<ProtoRule>, Status> {
        let rule = rule_from_request(request.into_inner().rule)?;
        let updated = self.backend.update_rate_limit(rule).await?;
        Ok(Response::new(updated.into()))
    }

    #[instrument(skip(self, request), fields(id = %request.get_ref().id))]
    async fn delete_rate_limit(
        &self,
        request: Request<DeleteRateLimitRequest>,
    ) -> Result<Response<DeleteRateLimitResponse>, Status> {
        self.backend
            .delete_rate_limit(&request.get_ref().id)
            .await?;
        Ok(Response::new(DeleteRateLimitResponse {}))
    }

    #[instrument(skip(self, request))]
    async fn list_rate_limits(
        &self,
        request: Request<ListRateLimitsRequest>,
    ) -> Result<Response<ListRateLimitsResponse>, Status> {
        let filter = RateLimitFilter::try_from(request.into_inner())?;
        let filter = (!filter.is_empty()).then_some(filter);

        let rules = self.backend.list_rate_limits(filter).await?;
        debug!(count = rules.len(), "Listed rate limit rules");

        Ok(Response::new(ListRateLimitsResponse {
            rules: rules.into_iter().map(Into::into).collect(),
        }))
    }

    /// Check admission for a caller without recording the request.
    #[instrument(
        skip(self, request),
        fields(
            rule_id = %request.get_ref().rule_id,
            caller_id = %request.get_ref().caller_id
        )
    )]
    async fn check_rate_limit(
        &self,
        request: Request<AdmissionRequest>,
    ) -> Result<Response<CheckRateLimitResponse>, Status> {
        let req = request.into_inner();
        validate_admission(&req)?;

        let outcome = self
            .backend
            .check_rate_limit(&req.rule_id, &req.caller_id)
            .await;
        if let Some(err) = outcome.error {
            return Err(fail_open_status(err));
        }

        info!(allowed = outcome.allowed, "Rate limit decision made");
        Ok(Response::new(CheckRateLimitResponse {
            allowed: outcome.allowed,
        }))
    }

    #[instrument(
        skip(self, request),
        fields(
            rule_id = %request.get_ref().rule_id,
            caller_id = %request.get_ref().caller_id
        )
    )]
    async fn apply_rate_limit(
        &self,
        request: Request<AdmissionRequest>,
    ) -> Result<Response<ApplyRateLimitResponse>, Status> {
        let req = request.into_inner();
        validate_admission(&req)?;

        self.backend
            .apply_rate_limit(&req.rule_id, &req.caller_id)
            .await?;
        Ok(Response::new(ApplyRateLimitResponse {}))
    }

    /// Check admission and record the request only if it is admitted.
    #[instrument(
        skip(self, request),
        fields(
            rule_id = %request.get_ref().rule_id,
            caller_id = %request.get_ref().caller_id
        )
    )]
    async fn attempt_rate_limit(
        &self,
        request: Request<AdmissionRequest>,
    ) -> Result<Response<AttemptRateLimitResponse>, Status> {
        let req = request.into_inner();
        validate_admission(&req)?;

        let decision = self
            .backend
            .attempt_rate_limit(&req.rule_id, &req.caller_id)
            .await?;

        info!(allowed = decision.allowed, "Rate limit decision made");
        Ok(Response::new(decision.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grpc::convert::ALLOWED_METADATA_KEY;
    use crate::ratelimit::{InMemoryRuleStore, LimitsService as Limits, RateLimitEngine, RuleStore};

    fn service() -> LimitsServiceImpl<Limits> {
        let store: Arc<dyn RuleStore> = Arc::new(InMemoryRuleStore::new());
        let limits = Limits::new(store, Arc::new(RateLimitEngine::new()));
        LimitsServiceImpl::new(Arc::new(limits))
    }

    fn api_users(limit: i64) -> ProtoRule {
        ProtoRule {
            id: "api-users".to_string(),
            limit,
            window: "1m".to_string(),
            algorithm: "sliding_window".to_string(),
            key_pattern: "user:{{user_id}}".to_string(),
        }
    }

    fn admission(rule_id: &str, caller_id: &str) -> Request<AdmissionRequest> {
        Request::new(AdmissionRequest {
            rule_id: rule_id.to_string(),
            caller_id: caller_id.to_string(),
        })
    }

    async fn create(service: &LimitsServiceImpl<Limits>, rule: ProtoRule) -> ProtoRule {
        service
            .create_rate_limit(Request::new(CreateRateLimitRequest { rule: Some(rule) }))
            .await
            .unwrap()
            .into_inner()
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let service = service();
        let created = create(&service, api_users(2)).await;
        assert_eq!(created, api_users(2));

        let found = service
            .get_rate_limit(Request::new(GetRateLimitRequest {
                id: "api-users".to_string(),
            }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(found, created);
    }

    #[tokio::test]
    async fn test_create_invalid_rule_rejected() {
        let service = service();

        let result = service
            .create_rate_limit(Request::new(CreateRateLimitRequest {
                rule: Some(api_users(0)),
            }))
            .await;
        assert_eq!(result.unwrap_err().code(), tonic::Code::InvalidArgument);

        let result = service
            .create_rate_limit(Request::new(CreateRateLimitRequest { rule: None }))
            .await;
        assert_eq!(result.unwrap_err().code(), tonic::Code::InvalidArgument);
    }

    #[tokio::test]
    async fn test_get_missing_rule() {
        let service = service();
        let result = service
            .get_rate_limit(Request::new(GetRateLimitRequest {
                id: "missing".to_string(),
            }))
            .await;
        assert_eq!(result.unwrap_err().code(), tonic::Code::NotFound);
    }

    #[tokio::test]
    async fn test_update_list_and_delete() {
        let service = service();
        create(&service, api_users(2)).await;

        let updated = service
            .update_rate_limit(Request::new(UpdateRateLimitRequest {
                rule: Some(api_users(10)),
            }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(updated.limit, 10);

        let listed = service
            .list_rate_limits(Request::new(ListRateLimitsRequest {
                limit: Some(10),
                ..Default::default()
            }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(listed.rules, vec![api_users(10)]);

        for _ in 0..2 {
            service
                .delete_rate_limit(Request::new(DeleteRateLimitRequest {
                    id: "api-users".to_string(),
                }))
                .await
                .unwrap();
        }

        let listed = service
            .list_rate_limits(Request::new(ListRateLimitsRequest::default()))
            .await
            .unwrap()
            .into_inner();
        assert!(listed.rules.is_empty());
    }

    #[tokio::test]
    async fn test_apply_then_check() {
        let service = service();
        create(&service, api_users(2)).await;

        for _ in 0..2 {
            service.apply_rate_limit(admission("api-users", "u1")).await.unwrap();
        }

        let response = service
            .check_rate_limit(admission("api-users", "u1"))
            .await
            .unwrap()
            .into_inner();
        assert!(!response.allowed);

        let response = service
            .check_rate_limit(admission("api-users", "u2"))
            .await
            .unwrap()
            .into_inner();
        assert!(response.allowed);
    }

    #[tokio::test]
    async fn test_check_unknown_rule_reports_fail_open() {
        let service = service();

        let status = service
            .check_rate_limit(admission("missing", "u1"))
            .await
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::NotFound);
        assert_eq!(
            status.metadata().get(ALLOWED_METADATA_KEY).unwrap(),
            "true"
        );
    }

    #[tokio::test]
    async fn test_apply_unknown_rule() {
        let service = service();
        let status = service
            .apply_rate_limit(admission("missing", "u1"))
            .await
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::NotFound);
    }

    #[tokio::test]
    async fn test_empty_ids_rejected() {
        let service = service();

        let status = service.check_rate_limit(admission("", "u1")).await.unwrap_err();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);

        let status = service
            .attempt_rate_limit(admission("api-users", ""))
            .await
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);
    }

    #[tokio::test]
    async fn test_attempt_reports_retry_after() {
        let service = service();
        create(&service, api_users(1)).await;

        let first = service
            .attempt_rate_limit(admission("api-users", "u1"))
            .await
            .unwrap()
            .into_inner();
        assert!(first.allowed);
        assert_eq!(first.remaining, 0);
        assert!(first.retry_after.is_none());

        let second = service
            .attempt_rate_limit(admission("api-users", "u1"))
            .await
            .unwrap()
            .into_inner();
        assert!(!second.allowed);
        let retry_after = second.retry_after.unwrap();
        assert!(retry_after.seconds <= 60);
        assert!(retry_after.seconds >= 59);
    }
}
