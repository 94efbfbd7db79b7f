use std::future::{ready, Ready};

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error, HttpMessage,
};
use futures::future::LocalBoxFuture;

use crate::error::AppError;
use crate::middleware::auth_context::AuthenticatedUser;
use crate::models::user::Role;

/// Restricts a scope to users holding one of `roles`. Must sit inside `AuthMiddleware`.
pub struct RequireRole {
    roles: &'static [Role],
}

impl RequireRole {
    pub fn new(roles: &'static [Role]) -> Self {
        RequireRole { roles }
    }
}

impl<S, B> Transform<S, ServiceRequest> for RequireRole
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = RequireRoleService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RequireRoleService {
            service,
            roles: self.roles,
        }))
    }
}

pub struct RequireRoleService<S> {
    service: S,
    roles: &'static [Role],
}

impl<S, B> Service<ServiceRequest> for RequireRoleService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let role = req
            .extensions()
            .get::<AuthenticatedUser>()
            .map(|user| user.0.role);

        match role {
            Some(role) if self.roles.contains(&role) => Box::pin(self.service.call(req)),
            Some(role) => {
                log::warn!(
                    "Role {} denied for {} {}",
                    role.as_str(),
                    req.method(),
                    req.path()
                );
                Box::pin(ready(Err(AppError::Forbidden(
                    "You do not have permission to perform this action".to_string(),
                )
                .into())))
            }
            None => Box::pin(ready(Err(AppError::Unauthorized(
                "You are not logged in! Please log in to get access.".to_string(),
            )
            .into()))),
        }
    }
}
