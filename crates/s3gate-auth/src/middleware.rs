use std::{future::Future, pin::Pin, sync::Arc, task::Poll};

use axum::{
    body::Body,
    response::{IntoResponse, Response},
};
use http::{HeaderMap, Method, Request, Uri, header::CONTENT_TYPE};
use percent_encoding::percent_decode_str;
use s3gate_common::{AccessTarget, Bucket, ObjectRef, S3GateError};
use tower::{Layer, Service};
use tracing::{debug, warn};

use crate::{
    access::{AccessResolver, enforce},
    signature_v4::SigningContext,
};

/// Caller identity established by [`AuthMiddleware`], available to handlers as a request
/// extension. `identity` is `None` for anonymous access to a public target.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AuthContext {
    pub identity: Option<String>,
}

#[derive(Clone)]
pub struct AuthLayer {
    resolver: Arc<dyn AccessResolver>,
}

impl AuthLayer {
    pub fn new(resolver: Arc<dyn AccessResolver>) -> Self {
        Self { resolver }
    }
}

impl<S> Layer<S> for AuthLayer {
    type Service = AuthMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthMiddleware {
            inner,
            resolver: Arc::clone(&self.resolver),
        }
    }
}

#[derive(Clone)]
pub struct AuthMiddleware<S> {
    inner: S,
    resolver: Arc<dyn AccessResolver>,
}

impl<S, ReqBody> Service<Request<ReqBody>> for AuthMiddleware<S>
where
    S: Service<Request<ReqBody>, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
    ReqBody: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut std::task::Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        let mut inner = self.inner.clone();
        let resolver = Arc::clone(&self.resolver);

        Box::pin(async move {
            let resource = req.uri().path().to_string();
            let outcome =
                authenticate(resolver.as_ref(), req.method(), req.uri(), req.headers()).await;
            match outcome {
                Ok(context) => {
                    req.extensions_mut().insert(context);
                    inner.call(req).await
                }
                Err(err) => Ok(s3_error_response(err, &resource)),
            }
        })
    }
}

/// Resolves the target, checks access and, for signed requests, the signature.
/// Nothing downstream runs unless this returns `Ok`.
pub async fn authenticate(
    resolver: &dyn AccessResolver,
    method: &Method,
    uri: &Uri,
    headers: &HeaderMap,
) -> Result<AuthContext, S3GateError> {
    let target = request_target(method, uri.path());

    let signing = SigningContext::from_parts(method, uri, headers).map_err(|err| {
        debug!(error = %err, "failed to parse auth header");
        S3GateError::from(err)
    })?;
    let key_id = signing.as_ref().map(|ctx| ctx.key_id.as_str());

    let decision = resolver.resolve_access(key_id, &target).await?;
    let grant = enforce(decision).inspect_err(|err| {
        debug!(key_id = ?key_id, ?target, error = %err, "access check failed");
    })?;

    if let Some(ctx) = signing.as_ref() {
        let Some(secret) = grant.secret.as_deref() else {
            warn!(key_id = %ctx.key_id, "access granted to a key id without a secret");
            return Err(S3GateError::InvalidIdentity);
        };

        if !ctx.verify(secret) {
            debug!(key_id = %ctx.key_id, "signature mismatch");
            return Err(S3GateError::SignatureMismatch);
        }
    }

    Ok(AuthContext {
        identity: grant.identity,
    })
}

/// The entity a request is authorized against.
///
/// Listing buckets and creating one have no target; bucket operations, object writes and
/// multipart requests target the bucket; object reads and deletes target the object.
pub fn request_target(method: &Method, path: &str) -> AccessTarget {
    let path = path.trim_start_matches('/');
    let (bucket, key) = match path.split_once('/') {
        Some((bucket, key)) => (bucket, key),
        None => (path, ""),
    };

    if bucket.is_empty() {
        return AccessTarget::None;
    }
    let bucket = Bucket::new(decode_segment(bucket));

    if key.is_empty() {
        return if *method == Method::PUT {
            AccessTarget::None
        } else {
            AccessTarget::Bucket(bucket)
        };
    }

    match *method {
        Method::GET | Method::HEAD | Method::DELETE => {
            AccessTarget::Object(ObjectRef::new(bucket, decode_segment(key), 0))
        }
        _ => AccessTarget::Bucket(bucket),
    }
}

fn decode_segment(segment: &str) -> String {
    percent_decode_str(segment).decode_utf8_lossy().into_owned()
}

fn s3_error_response(error: S3GateError, resource: &str) -> Response {
    let request_id = uuid::Uuid::new_v4().simple().to_string();
    let body = error.to_xml(resource, &request_id);

    (
        error.status_code(),
        [
            (CONTENT_TYPE.as_str(), "application/xml"),
            ("x-amz-request-id", request_id.as_str()),
        ],
        Body::from(body),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use async_trait::async_trait;
    use http::{Method, Request};
    use s3gate_common::{
        AccessDecision, AccessGrant, AccessTarget, Bucket, ObjectRef, Result, S3GateError,
    };

    use super::{AuthContext, request_target};
    use crate::{
        access::AccessResolver,
        signature_v4::{SERVICE, credential_scope, get_string_to_sign, sign},
    };

    struct FixedResolver {
        decision: AccessDecision,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl AccessResolver for FixedResolver {
        async fn resolve_access(
            &self,
            _key_id: Option<&str>,
            _target: &AccessTarget,
        ) -> Result<AccessDecision> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.decision.clone())
        }
    }

    async fn authenticate(resolver: &FixedResolver, req: &Request<()>) -> Result<AuthContext> {
        super::authenticate(resolver, req.method(), req.uri(), req.headers()).await
    }

    fn resolver(decision: AccessDecision) -> Arc<FixedResolver> {
        Arc::new(FixedResolver {
            decision,
            calls: AtomicUsize::new(0),
        })
    }

    fn granted(secret: &str) -> AccessDecision {
        AccessDecision::Granted(AccessGrant {
            identity: Some("alice".to_string()),
            secret: Some(secret.to_string()),
        })
    }

    fn signed_request(secret: &str) -> Request<()> {
        let timestamp = "20240102T030405Z";
        let canonical = format!(
            "GET\n/photos\n\nhost:s3.local\nx-amz-date:{timestamp}\n\nhost;x-amz-date\nUNSIGNED-PAYLOAD"
        );
        let scope = credential_scope("20240102", "us-east-1");
        let to_sign = get_string_to_sign(&canonical, timestamp, &scope);
        let signature = hex::encode(sign(secret, "20240102", "us-east-1", SERVICE, &to_sign));
        Request::builder()
            .method(Method::GET)
            .uri("/photos")
            .header("host", "s3.local")
            .header("x-amz-date", timestamp)
            .header(
                "authorization",
                format!(
                    "AWS4-HMAC-SHA256 Credential=alice/20240102/us-east-1/s3/aws4_request, SignedHeaders=host;x-amz-date, Signature={signature}"
                ),
            )
            .body(())
            .unwrap()
    }

    #[test]
    fn targets_follow_route_shape() {
        assert_eq!(request_target(&Method::GET, "/"), AccessTarget::None);
        assert_eq!(request_target(&Method::PUT, "/photos"), AccessTarget::None);
        assert_eq!(
            request_target(&Method::GET, "/photos"),
            AccessTarget::Bucket(Bucket::new("photos"))
        );
        assert_eq!(
            request_target(&Method::DELETE, "/photos/"),
            AccessTarget::Bucket(Bucket::new("photos"))
        );
        assert_eq!(
            request_target(&Method::PUT, "/photos/a/b.jpg"),
            AccessTarget::Bucket(Bucket::new("photos"))
        );
        assert_eq!(
            request_target(&Method::POST, "/photos/a/b.jpg"),
            AccessTarget::Bucket(Bucket::new("photos"))
        );
        assert_eq!(
            request_target(&Method::GET, "/photos/a%20b/c.jpg"),
            AccessTarget::Object(ObjectRef::new(Bucket::new("photos"), "a b/c.jpg", 0))
        );
    }

    #[tokio::test]
    async fn valid_signature_yields_identity() {
        let resolver = resolver(granted("s3cret"));
        let ctx = authenticate(resolver.as_ref(), &signed_request("s3cret"))
            .await
            .unwrap();
        assert_eq!(ctx.identity.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn bad_signature_is_rejected() {
        let resolver = resolver(granted("s3cret"));
        let err = authenticate(resolver.as_ref(), &signed_request("guessed"))
            .await
            .unwrap_err();
        assert!(matches!(err, S3GateError::SignatureMismatch));
    }

    #[tokio::test]
    async fn unknown_identity_is_not_a_signature_failure() {
        let resolver = resolver(AccessDecision::UnknownIdentity);
        let err = authenticate(resolver.as_ref(), &signed_request("s3cret"))
            .await
            .unwrap_err();
        assert!(matches!(err, S3GateError::InvalidIdentity));
    }

    #[tokio::test]
    async fn anonymous_private_target_is_denied() {
        let resolver = resolver(AccessDecision::Denied);
        let req = Request::builder().uri("/private").body(()).unwrap();
        let err = authenticate(resolver.as_ref(), &req).await.unwrap_err();
        assert!(matches!(err, S3GateError::AccessDenied));
    }

    #[tokio::test]
    async fn malformed_header_never_reaches_resolver() {
        let resolver = resolver(granted("s3cret"));
        let req = Request::builder()
            .uri("/private")
            .header("authorization", "AWS4-HMAC-SHA256 Credential=alice")
            .body(())
            .unwrap();
        let err = authenticate(resolver.as_ref(), &req).await.unwrap_err();
        assert!(matches!(err, S3GateError::MalformedAuth(_)));
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn anonymous_public_target_has_no_identity() {
        let resolver = resolver(AccessDecision::Granted(AccessGrant::default()));
        let req = Request::builder().uri("/public").body(()).unwrap();
        let ctx = authenticate(resolver.as_ref(), &req).await.unwrap();
        assert_eq!(ctx.identity, None);
    }
}
