use hyper::Method;

/// Endpoint a request is addressed to, with its path parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Health,
    /// CORS preflight for any path
    Preflight,

    // Smart HTTP
    InfoRefs { owner: String, repo: String },
    ServiceRpc { owner: String, repo: String, service: String },

    // JSON API
    CreateRepository,
    ListRepositories { owner: String },
    Tree { owner: String, repo: String },
    Path { owner: String, repo: String },
    Commits { owner: String, repo: String },
    ReadFile { owner: String, repo: String },
    EditFile { owner: String, repo: String },

    NotFound,
}

impl Route {
    /// Git client traffic gets plain-text errors instead of JSON
    pub fn is_git(&self) -> bool {
        matches!(self, Route::InfoRefs { .. } | Route::ServiceRpc { .. })
    }
}

fn repo_name(segment: &str) -> String {
    segment.strip_suffix(".git").unwrap_or(segment).to_string()
}

pub fn route(method: &Method, path: &str) -> Route {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    match (method.as_str(), segments.as_slice()) {
        ("OPTIONS", _) => Route::Preflight,
        ("GET", []) | ("GET", ["api", "v1"]) => Route::Health,

        ("GET", [owner, repo, "info", "refs"]) => Route::InfoRefs {
            owner: owner.to_string(),
            repo: repo_name(repo),
        },
        ("POST", [owner, repo, service]) if service.starts_with("git-") => Route::ServiceRpc {
            owner: owner.to_string(),
            repo: repo_name(repo),
            service: service.to_string(),
        },

        ("POST", ["repos", "create"]) => Route::CreateRepository,
        ("GET", ["repos", owner]) => Route::ListRepositories { owner: owner.to_string() },
        (method, ["repos", owner, repo, endpoint]) => {
            let (owner, repo) = (owner.to_string(), repo.to_string());
            match (method, *endpoint) {
                ("GET", "tree") => Route::Tree { owner, repo },
                ("GET", "path") => Route::Path { owner, repo },
                ("GET", "commits") => Route::Commits { owner, repo },
                ("GET", "file") => Route::ReadFile { owner, repo },
                ("PUT", "file") => Route::EditFile { owner, repo },
                _ => Route::NotFound,
            }
        }

        _ => Route::NotFound,
    }
}
