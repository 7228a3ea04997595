use std::io::Read;

use flate2::read::GzDecoder;
use hyper::header::{self, HeaderMap, HeaderValue};
use hyper::{Body, Request, Response, StatusCode};
use tracing::{debug, info};

use super::response::{self, header_value};
use super::router::Route;
use super::AppState;
use crate::core::{GitError, Result};
use crate::protocol::{authorize_fetch, authorize_push, parse_ref_updates, GitService, ServiceInput};

pub async fn dispatch(state: &AppState, route: Route, req: Request<Body>) -> Result<Response<Body>> {
    match route {
        Route::InfoRefs { owner, repo } => info_refs(state, &owner, &repo, req).await,
        Route::ServiceRpc { owner, repo, service } => service_rpc(state, &owner, &repo, &service, req).await,
        _ => Err(response::not_found()),
    }
}

fn git_protocol(headers: &HeaderMap) -> Option<String> {
    headers
        .get("git-protocol")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

fn is_gzip(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_ENCODING)
        .and_then(|value| value.to_str().ok())
        .map_or(false, |value| value.eq_ignore_ascii_case("gzip") || value.eq_ignore_ascii_case("x-gzip"))
}

fn streaming(body: Body, content_type: &str) -> Result<Response<Body>> {
    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, header_value(content_type)?);
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    Ok(response)
}

/// Ref listings and fetches of private repositories are checked only when
/// enforcement is on
async fn check_fetch(state: &AppState, owner: &str, repo: &str, headers: &HeaderMap) -> Result<()> {
    let enforce = state.config.access.enforce_upload_pack_visibility;
    if !enforce {
        return Ok(());
    }
    let actor = state.actor(headers).await;
    let record = state.repositories.find_by_owner_and_name(owner, repo).await?;
    authorize_fetch(actor.as_ref(), record.as_ref(), enforce)
}

/// `GET /{owner}/{repo}.git/info/refs?service=...`
async fn info_refs(state: &AppState, owner: &str, repo: &str, req: Request<Body>) -> Result<Response<Body>> {
    let params = response::query_params(req.uri());
    let service = GitService::from_name(params.get("service").map(String::as_str).unwrap_or_default())?;
    let path = state.locator.resolve(owner, repo)?;
    // Both advertisements list every ref, so both are hidden alike
    check_fetch(state, owner, repo, req.headers()).await?;

    debug!(%service, repo = %path.display(), "advertising refs");
    let body = state
        .backend
        .advertise(service, &path, git_protocol(req.headers()).as_deref())?;
    streaming(body, &service.advertisement_content_type())
}

/// `POST /{owner}/{repo}.git/git-upload-pack|git-receive-pack`
async fn service_rpc(
    state: &AppState,
    owner: &str,
    repo: &str,
    service: &str,
    req: Request<Body>,
) -> Result<Response<Body>> {
    let service = GitService::from_name(service).map_err(|_| response::not_found())?;
    let protocol = git_protocol(req.headers());
    let gzip = is_gzip(req.headers());

    let (path, input) = match service {
        GitService::UploadPack => {
            let path = state.locator.resolve(owner, repo)?;
            check_fetch(state, owner, repo, req.headers()).await?;
            (path, ServiceInput { body: req.into_body(), gzip })
        }
        GitService::ReceivePack => {
            let actor = state.actor(req.headers()).await;
            let record = state.repositories.find_by_owner_and_name(owner, repo).await?;
            let actor = authorize_push(actor.as_ref(), record.as_ref())?;
            let path = state.locator.resolve(owner, repo)?;

            let input = match (&state.validator, record) {
                (Some(validator), Some(record)) => {
                    let limit = state.config.limits.max_inspect_bytes;
                    let raw = response::read_body(req.into_body(), limit).await?;
                    let payload = if gzip { inflate(&raw, limit)? } else { raw.to_vec() };
                    let updates = parse_ref_updates(&payload)?;
                    validator.validate(actor, &record, &updates)?;
                    debug!(updates = updates.len(), "push passed pre-receive checks");
                    ServiceInput { body: Body::from(payload), gzip: false }
                }
                _ => ServiceInput { body: req.into_body(), gzip },
            };
            (path, input)
        }
    };

    info!(%service, repo = %path.display(), "starting git service");
    let body = state.backend.serve(service, &path, protocol.as_deref(), input)?;
    streaming(body, &service.result_content_type())
}

/// Decompress a buffered gzip payload, bounded by `limit`
fn inflate(data: &[u8], limit: usize) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    GzDecoder::new(data)
        .take(limit as u64 + 1)
        .read_to_end(&mut out)
        .map_err(|e| GitError::invalid(format!("Invalid gzip body: {}", e)))?;
    if out.len() > limit {
        return Err(GitError::invalid(format!("Push exceeds {} bytes", limit)));
    }
    Ok(out)
}
