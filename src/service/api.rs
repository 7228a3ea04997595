use std::collections::HashMap;
use std::path::PathBuf;

use hyper::header::HeaderMap;
use hyper::{Body, Request, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use super::response::{self, json};
use super::router::Route;
use super::AppState;
use crate::auth::Actor;
use crate::core::{GitError, ObjectId, Result};
use crate::protocol::authorize_push;
use crate::repository::navigator::{self, ItemType, PathContent, Revision, TreeItem, WalkLimits};
use crate::repository::{
    edit_file_gated, history, CommitGate, EditRequest, GixObjectStore, HistoryEntry, NewRepository, Owner, Visibility,
};

pub async fn dispatch(state: &AppState, route: Route, req: Request<Body>) -> Result<Response<Body>> {
    match route {
        Route::Health => Ok(json(StatusCode::OK, &json!({ "status": "OK" }))),
        Route::CreateRepository => create_repository(state, req).await,
        Route::ListRepositories { owner } => list_repositories(state, &owner, req.headers()).await,
        Route::Tree { owner, repo } => tree(state, &owner, &repo, req).await,
        Route::Path { owner, repo } => path(state, &owner, &repo, req).await,
        Route::Commits { owner, repo } => commits(state, &owner, &repo, req).await,
        Route::ReadFile { owner, repo } => read_file(state, &owner, &repo, req).await,
        Route::EditFile { owner, repo } => edit(state, &owner, &repo, req).await,
        _ => Err(response::not_found()),
    }
}

async fn require_actor(state: &AppState, headers: &HeaderMap) -> Result<Actor> {
    state
        .actor(headers)
        .await
        .ok_or_else(|| GitError::Unauthenticated("Unauthorized Request".to_string()))
}

#[derive(Debug, Deserialize)]
struct CreateRepositoryBody {
    name: String,
    #[serde(default)]
    visibility: Visibility,
    #[serde(default)]
    description: String,
}

/// `POST /repos/create`
async fn create_repository(state: &AppState, req: Request<Body>) -> Result<Response<Body>> {
    let actor = require_actor(state, req.headers()).await?;
    let body: CreateRepositoryBody = response::read_json(req.into_body(), state.config.limits.max_json_bytes).await?;
    let name = body.name.trim().trim_end_matches(".git").to_string();

    if state
        .repositories
        .find_by_owner_and_name(&actor.username, &name)
        .await?
        .is_some()
    {
        return Err(GitError::Conflict(format!("Repository {}/{} already exists", actor.username, name)));
    }

    let locator = state.locator.clone();
    let (owner, repo_name) = (actor.username.clone(), name.clone());
    let path = state
        .blocking(move || locator.init_bare(&owner, &repo_name, "main"))
        .await?;

    let record = state
        .repositories
        .create(NewRepository {
            owner: Owner { id: actor.id.clone(), username: actor.username.clone() },
            name,
            description: body.description,
            visibility: body.visibility,
            path,
        })
        .await?;
    info!(owner = %record.owner.username, name = %record.name, "created repository");
    Ok(json(StatusCode::CREATED, &json!({ "success": true, "repo": record })))
}

/// `GET /repos/{owner}`: everything for the owner, public repositories for others
async fn list_repositories(state: &AppState, owner: &str, headers: &HeaderMap) -> Result<Response<Body>> {
    let actor = state.actor(headers).await;
    let repos = if actor.as_ref().map_or(false, |a| a.username == owner) {
        state.repositories.list_by_owner(owner).await?
    } else {
        state.repositories.list_public_by_owner(owner).await?
    };
    Ok(json(StatusCode::OK, &json!({ "success": true, "repos": repos })))
}

/// An on-disk repository the caller may read, with its default branch
struct Readable {
    path: PathBuf,
    default_branch: String,
}

async fn readable(state: &AppState, owner: &str, repo: &str, headers: &HeaderMap) -> Result<Readable> {
    let path = state.locator.resolve(owner, repo)?;
    let record = state.repositories.find_by_owner_and_name(owner, repo).await?;
    let default_branch = match record {
        Some(record) => {
            let actor = state.actor(headers).await;
            if !record.readable_by(actor.as_ref().map(|a| a.id.as_str())) {
                return Err(GitError::not_found("Repository not found"));
            }
            record.default_branch
        }
        None => "main".to_string(),
    };
    Ok(Readable { path, default_branch })
}

fn revision(params: &HashMap<String, String>, default_branch: &str) -> Result<Revision> {
    Revision::from_query(
        params.get("branch").map(String::as_str),
        params.get("commit").map(String::as_str),
        default_branch,
    )
}

fn revision_label(revision: &Revision) -> Option<String> {
    match revision {
        Revision::Ref(name) => Some(name.clone()),
        Revision::Commit(_) => None,
    }
}

fn parse_flag(params: &HashMap<String, String>, key: &str) -> bool {
    params
        .get(key)
        .map_or(false, |value| matches!(value.as_str(), "1" | "true" | "yes"))
}

fn parse_number(params: &HashMap<String, String>, key: &str) -> Result<Option<usize>> {
    params
        .get(key)
        .map(|value| {
            value
                .parse()
                .map_err(|_| GitError::invalid(format!("{} must be a non-negative integer", key)))
        })
        .transpose()
}

#[derive(Serialize)]
struct TreeResponse {
    branch: Option<String>,
    commit: ObjectId,
    path: String,
    items: Vec<TreeItem>,
}

/// `GET /repos/{owner}/{repo}/tree?branch&path&recursive&depth`
async fn tree(state: &AppState, owner: &str, repo: &str, req: Request<Body>) -> Result<Response<Body>> {
    let repository = readable(state, owner, repo, req.headers()).await?;
    let params = response::query_params(req.uri());
    let revision = revision(&params, &repository.default_branch)?;
    let scope = params.get("path").cloned().unwrap_or_default();
    let recursive = parse_flag(&params, "recursive");
    let limits = WalkLimits {
        max_depth: parse_number(&params, "depth")?,
        max_entries: Some(state.config.limits.max_tree_entries),
    };

    let branch = revision_label(&revision);
    let response = state
        .blocking(move || {
            let store = GixObjectStore::open(&repository.path)?;
            let commit = navigator::resolve_revision(&store, &revision)?;
            let located = navigator::descend(&store, &commit.tree, &scope)?;
            if located.kind != ItemType::Dir {
                return Err(GitError::invalid(format!("Not a directory: {}", scope)));
            }
            let items = if recursive {
                navigator::list_tree_recursive(&store, &located.oid, &located.path, limits)?
            } else {
                navigator::list_tree(&store, &located.oid, &located.path)?
            };
            Ok(TreeResponse { branch, commit: commit.oid, path: located.path, items })
        })
        .await?;
    Ok(json(StatusCode::OK, &response))
}

#[derive(Serialize)]
struct PathResponse {
    branch: Option<String>,
    commit: ObjectId,
    #[serde(flatten)]
    content: PathContent,
}

/// `GET /repos/{owner}/{repo}/path?branch|commit&path`
async fn path(state: &AppState, owner: &str, repo: &str, req: Request<Body>) -> Result<Response<Body>> {
    let repository = readable(state, owner, repo, req.headers()).await?;
    let params = response::query_params(req.uri());
    let revision = revision(&params, &repository.default_branch)?;
    let target = params.get("path").cloned().unwrap_or_default();

    let branch = revision_label(&revision);
    let response = state
        .blocking(move || {
            let store = GixObjectStore::open(&repository.path)?;
            let commit = navigator::resolve_revision(&store, &revision)?;
            let content = navigator::read_path(&store, &commit, &target)?;
            Ok(PathResponse { branch, commit: commit.oid, content })
        })
        .await?;
    Ok(json(StatusCode::OK, &response))
}

#[derive(Serialize)]
struct CommitsResponse {
    branch: String,
    commits: Vec<HistoryEntry>,
}

/// `GET /repos/{owner}/{repo}/commits?branch&limit`
async fn commits(state: &AppState, owner: &str, repo: &str, req: Request<Body>) -> Result<Response<Body>> {
    let repository = readable(state, owner, repo, req.headers()).await?;
    let params = response::query_params(req.uri());
    let branch = params
        .get("branch")
        .filter(|b| !b.is_empty())
        .cloned()
        .unwrap_or(repository.default_branch);
    let max = state.config.limits.history_limit;
    let limit = parse_number(&params, "limit")?.map_or(max, |limit| limit.min(max));

    let name = branch.clone();
    let commits = state
        .blocking(move || {
            let store = GixObjectStore::open(&repository.path)?;
            history(&store, &name, limit)
        })
        .await?;
    Ok(json(StatusCode::OK, &CommitsResponse { branch, commits }))
}

#[derive(Serialize)]
struct FileResponse {
    branch: Option<String>,
    commit: ObjectId,
    path: String,
    content: String,
}

/// `GET /repos/{owner}/{repo}/file?branch|commit&path`
async fn read_file(state: &AppState, owner: &str, repo: &str, req: Request<Body>) -> Result<Response<Body>> {
    let repository = readable(state, owner, repo, req.headers()).await?;
    let params = response::query_params(req.uri());
    let revision = revision(&params, &repository.default_branch)?;
    let path = params
        .get("path")
        .filter(|p| !p.is_empty())
        .cloned()
        .ok_or_else(|| GitError::invalid("path is required"))?;

    let branch = revision_label(&revision);
    let response = state
        .blocking(move || {
            let store = GixObjectStore::open(&repository.path)?;
            let commit = navigator::resolve_revision(&store, &revision)?;
            let data = navigator::read_file(&store, &commit, &path)?;
            Ok(FileResponse {
                branch,
                commit: commit.oid,
                path,
                content: String::from_utf8_lossy(&data).into_owned(),
            })
        })
        .await?;
    Ok(json(StatusCode::OK, &response))
}

/// `PUT /repos/{owner}/{repo}/file`: owner only
async fn edit(state: &AppState, owner: &str, repo: &str, req: Request<Body>) -> Result<Response<Body>> {
    let actor = state.actor(req.headers()).await;
    let record = state.repositories.find_by_owner_and_name(owner, repo).await?;
    authorize_push(actor.as_ref(), record.as_ref())?;
    let path = state.locator.resolve(owner, repo)?;
    let request: EditRequest = response::read_json(req.into_body(), state.config.limits.max_json_bytes).await?;

    let locks = state.locks.clone();
    let scratch = state.scratch.clone();
    let gate = CommitGate::new();
    let outcome = state
        .blocking_commit(gate.clone(), move || {
            let store = GixObjectStore::open(&path)?;
            edit_file_gated(&store, &locks, &path, &scratch, &request, &gate)
        })
        .await?;
    Ok(json(StatusCode::OK, &outcome))
}
