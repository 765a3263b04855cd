#![forbid(unsafe_code)]

//! HTTP front end for the showcase: public views, the admin login and the
//! gated upload/delete/feature endpoints. Pages are served as JSON for the
//! site's templates to render.

use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use axum::{
    Form, Json, Router,
    body::Body,
    extract::{DefaultBodyLimit, FromRequestParts, Multipart, Path as AxumPath, State},
    http::{HeaderMap, StatusCode, header, request::Parts},
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
};
use clap::Parser;
use highlight_reel::{
    admin::{AdminActions, Upload},
    config::{DEFAULT_CONFIG_PATH, load_runtime_config_from},
    error::ReelError,
    intake::{FileIntake, StagedFile},
    listing::ListingService,
    present::{DashboardPage, HighlightsPage, HomePage},
    security::ensure_not_root,
    session::{
        AdminGate, Authenticated, expired_session_cookie, session_cookie, token_from_cookie_header,
    },
    store::{VideoRecord, VideoStore},
};
use mime_guess::MimeGuess;
use serde::{Deserialize, Serialize};
use tokio::{fs::File, signal, task};
use tokio_util::io::ReaderStream;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "highlight_reel=info,reel_server=info";
const LOGIN_PATH: &str = "/admin/login";
const DASHBOARD_PATH: &str = "/admin";

#[derive(Parser, Debug)]
#[command(author, version, about = "Serve the highlight-reel video showcase.")]
struct Cli {
    #[arg(
        long = "config",
        value_name = "PATH",
        default_value = DEFAULT_CONFIG_PATH,
        help = "Path to the config file"
    )]
    config: PathBuf,
}

#[derive(Clone)]
struct AppState {
    listing: Arc<ListingService>,
    actions: Arc<AdminActions>,
    gate: Arc<AdminGate>,
    intake: Arc<FileIntake>,
    max_upload_bytes: u64,
}

impl AppState {
    fn new(
        store: VideoStore,
        intake: FileIntake,
        session_ttl: chrono::Duration,
        max_upload_bytes: u64,
    ) -> Self {
        Self {
            listing: Arc::new(ListingService::new(store.clone())),
            actions: Arc::new(AdminActions::new(store.clone(), intake.clone())),
            gate: Arc::new(AdminGate::new(store, session_ttl)),
            intake: Arc::new(intake),
            max_upload_bytes,
        }
    }
}

fn router(state: AppState, body_limit: usize) -> Router {
    Router::new()
        .route("/", get(home))
        .route("/highlights", get(highlights))
        .route(DASHBOARD_PATH, get(dashboard))
        .route(LOGIN_PATH, get(login_status).post(login))
        .route("/admin/logout", get(logout))
        .route("/admin/upload", post(upload_video))
        .route("/admin/delete/{id}", post(delete_video))
        .route("/admin/toggle_featured/{id}", post(toggle_featured))
        .route("/uploads/{file}", get(serve_upload))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl From<ReelError> for ApiError {
    fn from(err: ReelError) -> Self {
        match err {
            ReelError::Validation(message) => Self::bad_request(message),
            ReelError::NotFound(id) => Self::not_found(format!("video {id} not found")),
            ReelError::AuthRejected => Self::new(StatusCode::UNAUTHORIZED, "Invalid credentials!"),
            ReelError::CredentialNotConfigured => Self::new(
                StatusCode::UNAUTHORIZED,
                "No administrator account has been set up yet.",
            ),
            other => {
                error!(error = %other, "request failed");
                Self::internal("an internal error occurred")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": self.message,
        });
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Extractor that lets a request through only when its session is
/// authenticated; everyone else is sent to the login page.
struct AdminSession(Authenticated);

impl FromRequestParts<AppState> for AdminSession {
    type Rejection = Redirect;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = session_token(&parts.headers);
        state
            .gate
            .check(token.as_deref())
            .map(AdminSession)
            .map_err(|_| Redirect::to(LOGIN_PATH))
    }
}

fn session_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .find_map(token_from_cookie_header)
        .map(str::to_owned)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    ensure_not_root("reel_server")?;
    let cli = Cli::parse();
    let config = load_runtime_config_from(&cli.config, std::env::vars())
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;

    let store = VideoStore::open(&config.database_path)
        .with_context(|| format!("opening database {}", config.database_path.display()))?;
    let intake = FileIntake::new(config.storage_root.clone())
        .with_context(|| format!("preparing storage root {}", config.storage_root.display()))?;

    if store
        .admin_credential()
        .context("reading administrative credential")?
        .is_none()
    {
        warn!(
            "no administrative credential configured; \
             run `reel_admin set-credential` to enable logins"
        );
    }

    let state = AppState::new(
        store,
        intake,
        config.session_ttl(),
        config.max_upload_bytes,
    );
    let app = router(state, config.max_upload_bytes_usize());

    let addr = SocketAddr::new(
        config
            .host
            .parse()
            .with_context(|| format!("parsing REEL_HOST {}", config.host))?,
        config.port,
    );
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {}", addr))?;
    info!(
        %addr,
        storage_root = %config.storage_root.display(),
        database = %config.database_path.display(),
        "highlight-reel listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running HTTP server")?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        error!(error = %err, "failed to install Ctrl+C handler");
    }
}

/// Runs store/intake work off the async runtime.
async fn blocking<F, T>(work: F) -> ApiResult<T>
where
    F: FnOnce() -> Result<T, ReelError> + Send + 'static,
    T: Send + 'static,
{
    task::spawn_blocking(work)
        .await
        .map_err(|err| ApiError::internal(format!("task join error: {err}")))?
        .map_err(ApiError::from)
}

async fn home(State(state): State<AppState>) -> ApiResult<Json<HomePage>> {
    let page = blocking(move || Ok(HomePage::render(state.listing.home()?, &state.intake))).await?;
    Ok(Json(page))
}

async fn highlights(State(state): State<AppState>) -> ApiResult<Json<HighlightsPage>> {
    let page = blocking(move || {
        Ok(HighlightsPage::render(
            state.listing.highlights()?,
            &state.intake,
        ))
    })
    .await?;
    Ok(Json(page))
}

async fn dashboard(
    _session: AdminSession,
    State(state): State<AppState>,
) -> ApiResult<Json<DashboardPage>> {
    let page =
        blocking(move || Ok(DashboardPage::render(state.listing.admin()?, &state.intake))).await?;
    Ok(Json(page))
}

#[derive(Deserialize)]
struct LoginForm {
    username: String,
    password: String,
}

#[derive(Serialize)]
struct LoginStatus {
    authenticated: bool,
}

async fn login_status(State(state): State<AppState>, headers: HeaderMap) -> Json<LoginStatus> {
    let token = session_token(&headers);
    Json(LoginStatus {
        authenticated: state.gate.check(token.as_deref()).is_ok(),
    })
}

async fn login(State(state): State<AppState>, Form(form): Form<LoginForm>) -> ApiResult<Response> {
    let gate = state.gate.clone();
    let token = blocking(move || gate.login(&form.username, &form.password)).await?;
    let cookie = session_cookie(&token, state.gate.sessions().ttl());
    Ok(([(header::SET_COOKIE, cookie)], Redirect::to(DASHBOARD_PATH)).into_response())
}

async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let token = session_token(&headers);
    state.gate.logout(token.as_deref());
    (
        [(header::SET_COOKIE, expired_session_cookie())],
        Redirect::to("/"),
    )
        .into_response()
}

#[derive(Serialize)]
struct UploadResponse {
    message: &'static str,
    video: VideoRecord,
}

#[derive(Serialize)]
struct DeleteResponse {
    message: &'static str,
    video_id: i64,
}

#[derive(Serialize)]
struct FeaturedResponse {
    message: &'static str,
    video_id: i64,
    featured: bool,
}

/// Form fields of one upload request. The video is staged in the storage
/// root as it arrives and only committed once the whole form is valid.
#[derive(Default)]
struct UploadForm {
    file: Option<(String, StagedFile)>,
    title: String,
    description: String,
    featured: bool,
}

async fn read_upload_form(mut multipart: Multipart, state: &AppState) -> ApiResult<UploadForm> {
    let max_bytes = state.max_upload_bytes;
    let mut form = UploadForm::default();
    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|err| ApiError::new(err.status(), err.body_text()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "video" => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let intake = state.intake.clone();
                let mut staged = blocking(move || intake.stage()).await?;
                while let Some(chunk) = field
                    .chunk()
                    .await
                    .map_err(|err| ApiError::new(err.status(), err.body_text()))?
                {
                    if staged.len() + chunk.len() as u64 > max_bytes {
                        return Err(ApiError::new(
                            StatusCode::PAYLOAD_TOO_LARGE,
                            format!(
                                "File too large. Maximum file size is {}MB.",
                                max_bytes / 1024 / 1024
                            ),
                        ));
                    }
                    staged = blocking(move || {
                        staged.write_chunk(&chunk)?;
                        Ok(staged)
                    })
                    .await?;
                }
                form.file = Some((file_name, staged));
            }
            "title" | "description" | "featured" => {
                let value = field
                    .text()
                    .await
                    .map_err(|err| ApiError::new(err.status(), err.body_text()))?;
                match name.as_str() {
                    "title" => form.title = value,
                    "description" => form.description = value,
                    _ => form.featured = true,
                }
            }
            _ => {}
        }
    }
    Ok(form)
}

async fn upload_video(
    AdminSession(auth): AdminSession,
    State(state): State<AppState>,
    multipart: Multipart,
) -> ApiResult<(StatusCode, Json<UploadResponse>)> {
    let form = read_upload_form(multipart, &state).await?;
    let (original_name, file) = form
        .file
        .ok_or_else(|| ApiError::bad_request("No file selected!"))?;

    let actions = state.actions.clone();
    let title = form.title;
    let description = form.description;
    let featured = form.featured;
    let video = blocking(move || {
        actions.upload(
            &auth,
            Upload {
                original_name: &original_name,
                file,
                title: &title,
                description: &description,
                featured,
            },
        )
    })
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            message: "Video uploaded successfully!",
            video,
        }),
    ))
}

async fn delete_video(
    AdminSession(auth): AdminSession,
    State(state): State<AppState>,
    AxumPath(id): AxumPath<i64>,
) -> ApiResult<Json<DeleteResponse>> {
    let actions = state.actions.clone();
    let removed = blocking(move || actions.delete(&auth, id)).await?;
    Ok(Json(DeleteResponse {
        message: "Video deleted successfully!",
        video_id: removed.id,
    }))
}

async fn toggle_featured(
    AdminSession(auth): AdminSession,
    State(state): State<AppState>,
    AxumPath(id): AxumPath<i64>,
) -> ApiResult<Json<FeaturedResponse>> {
    let actions = state.actions.clone();
    let featured = blocking(move || actions.toggle_featured(&auth, id)).await?;
    Ok(Json(FeaturedResponse {
        message: "Video featured status updated!",
        video_id: id,
        featured,
    }))
}

async fn serve_upload(
    State(state): State<AppState>,
    AxumPath(file): AxumPath<String>,
) -> ApiResult<Response> {
    let path = state
        .intake
        .resolve(&file)
        .map_err(|_| ApiError::not_found("file not found"))?;
    stream_file(path).await
}

async fn stream_file(path: PathBuf) -> ApiResult<Response> {
    let file = File::open(&path)
        .await
        .map_err(|_| ApiError::not_found("file not found"))?;

    let stream = ReaderStream::new(file);
    let body = Body::from_stream(stream);
    let mut response = body.into_response();
    if let Some(mime) = MimeGuess::from_path(&path).first() {
        if let Ok(value) = mime.to_string().parse() {
            response.headers_mut().insert(header::CONTENT_TYPE, value);
        }
    }

    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderValue, Request};
    use highlight_reel::{security::hash_password, store::NewVideo};
    use std::fs;
    use tempfile::{TempDir, tempdir};
    use tower::ServiceExt;

    const PASSWORD: &str = "a-long-enough-secret";
    const BOUNDARY: &str = "reel-form-boundary";

    struct TestApp {
        _dir: TempDir,
        store: VideoStore,
        intake: FileIntake,
        state: AppState,
    }

    impl TestApp {
        fn new(max_upload_bytes: u64) -> anyhow::Result<Self> {
            let dir = tempdir()?;
            let store = VideoStore::open(dir.path().join("reel.db"))?;
            store.set_admin_credential("admin", &hash_password(PASSWORD)?)?;
            let intake = FileIntake::new(dir.path().join("uploads"))?;
            let state = AppState::new(
                store.clone(),
                intake.clone(),
                chrono::Duration::hours(1),
                max_upload_bytes,
            );
            Ok(Self {
                _dir: dir,
                store,
                intake,
                state,
            })
        }

        async fn send(
            &self,
            body_limit: usize,
            request: Request<Body>,
        ) -> anyhow::Result<Response> {
            Ok(router(self.state.clone(), body_limit).oneshot(request).await?)
        }

        fn seed(&self, filename: &str) -> anyhow::Result<i64> {
            self.intake.store(b"clip", filename)?;
            Ok(self.store.insert(&NewVideo {
                title: "Seeded",
                description: "",
                filename,
                featured: false,
            })?)
        }

        /// Every record plus every entry in the storage root, hidden ones
        /// included.
        fn snapshot(&self) -> anyhow::Result<(Vec<VideoRecord>, Vec<String>)> {
            let mut entries = fs::read_dir(self.intake.root())?
                .map(|entry| Ok(entry?.file_name().to_string_lossy().into_owned()))
                .collect::<std::io::Result<Vec<_>>>()?;
            entries.sort();
            Ok((self.store.list_all()?, entries))
        }
    }

    fn multipart_body(file_name: &str, payload: &[u8]) -> Vec<u8> {
        let mut body = format!(
            "--{BOUNDARY}\r\n\
             Content-Disposition: form-data; name=\"title\"\r\n\r\n\
             Clip\r\n\
             --{BOUNDARY}\r\n\
             Content-Disposition: form-data; name=\"video\"; filename=\"{file_name}\"\r\n\
             Content-Type: video/mp4\r\n\r\n"
        )
        .into_bytes();
        body.extend_from_slice(payload);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    fn upload_request(token: Option<&str>, body: Vec<u8>) -> anyhow::Result<Request<Body>> {
        let mut builder = Request::post("/admin/upload").header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        );
        if let Some(token) = token {
            builder = builder.header(header::COOKIE, format!("reel_session={token}"));
        }
        Ok(builder.body(Body::from(body))?)
    }

    fn post(uri: &str) -> anyhow::Result<Request<Body>> {
        Ok(Request::post(uri).body(Body::empty())?)
    }

    #[tokio::test]
    async fn anonymous_admin_requests_redirect_without_changes() -> anyhow::Result<()> {
        let app = TestApp::new(1024 * 1024)?;
        let id = app.seed("20240101_000000_deadbeef_clip.mp4")?;
        let before = app.snapshot()?;

        let requests = vec![
            Request::get(DASHBOARD_PATH).body(Body::empty())?,
            upload_request(None, multipart_body("new.mp4", b"payload"))?,
            upload_request(Some("forged"), multipart_body("new.mp4", b"payload"))?,
            post(&format!("/admin/delete/{id}"))?,
            post(&format!("/admin/toggle_featured/{id}"))?,
        ];
        for request in requests {
            let uri = request.uri().to_string();
            let response = app.send(1024 * 1024, request).await?;
            assert_eq!(response.status(), StatusCode::SEE_OTHER, "{uri}");
            assert_eq!(
                response.headers().get(header::LOCATION),
                Some(&HeaderValue::from_static(LOGIN_PATH)),
                "{uri}"
            );
        }

        assert_eq!(app.snapshot()?, before);
        Ok(())
    }

    #[tokio::test]
    async fn signed_in_upload_is_stored() -> anyhow::Result<()> {
        let app = TestApp::new(1024 * 1024)?;
        let token = app.state.gate.login("admin", PASSWORD)?;

        let request = upload_request(Some(&token), multipart_body("intro.mp4", b"payload"))?;
        let response = app.send(1024 * 1024, request).await?;
        assert_eq!(response.status(), StatusCode::CREATED);

        let videos = app.store.list_all()?;
        assert_eq!(videos.len(), 1);
        assert_eq!(videos[0].title, "Clip");
        assert!(videos[0].filename.ends_with("_intro.mp4"));
        assert_eq!(app.intake.stored_names()?, vec![videos[0].filename.clone()]);
        assert_eq!(
            fs::read(app.intake.resolve(&videos[0].filename)?)?,
            b"payload"
        );
        Ok(())
    }

    #[tokio::test]
    async fn stored_files_are_served_with_guessed_type() -> anyhow::Result<()> {
        let app = TestApp::new(1024)?;
        app.seed("clip.webm")?;

        let request = Request::get("/uploads/clip.webm").body(Body::empty())?;
        let response = app.send(1024, request).await?;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE),
            Some(&HeaderValue::from_static("video/webm"))
        );

        let request = Request::get("/uploads/missing.mp4").body(Body::empty())?;
        assert_eq!(app.send(1024, request).await?.status(), StatusCode::NOT_FOUND);
        Ok(())
    }

    #[tokio::test]
    async fn oversized_uploads_get_413_and_leave_nothing() -> anyhow::Result<()> {
        let app = TestApp::new(1024)?;
        let token = app.state.gate.login("admin", PASSWORD)?;
        let before = app.snapshot()?;
        let payload = vec![b'x'; 4096];

        // Once with the request body cap, once with the per-file check.
        for body_limit in [1024, 1024 * 1024] {
            let request = upload_request(Some(&token), multipart_body("big.mp4", &payload))?;
            let response = app.send(body_limit, request).await?;
            assert_eq!(
                response.status(),
                StatusCode::PAYLOAD_TOO_LARGE,
                "body limit {body_limit}"
            );
            assert_eq!(app.snapshot()?, before);
        }
        Ok(())
    }

    #[test]
    fn session_token_reads_any_cookie_header() {
        let mut headers = HeaderMap::new();
        headers.append(header::COOKIE, HeaderValue::from_static("theme=dark"));
        headers.append(header::COOKIE, HeaderValue::from_static("reel_session=tok123"));
        assert_eq!(session_token(&headers).as_deref(), Some("tok123"));
        assert_eq!(session_token(&HeaderMap::new()), None);
    }

    #[test]
    fn reel_errors_map_to_statuses() {
        let cases = [
            (ReelError::validation("title is required"), StatusCode::BAD_REQUEST),
            (ReelError::NotFound(3), StatusCode::NOT_FOUND),
            (ReelError::AuthRejected, StatusCode::UNAUTHORIZED),
            (ReelError::CredentialNotConfigured, StatusCode::UNAUTHORIZED),
            (
                ReelError::Io(std::io::Error::other("disk full")),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status, status);
        }
    }

    #[test]
    fn internal_errors_do_not_leak_details() {
        let err = ApiError::from(ReelError::Io(std::io::Error::other("/secret/path")));
        assert!(!err.message.contains("/secret/path"));
    }
}
