use crate::application::accounts::AccountService;
use crate::application::api::ApiClient;
use crate::application::bootstrap::bootstrap_workspace;
use crate::application::route_guard::{RouteDecision, RouteGuard};
use crate::application::session::{Navigator, RecordingNavigator, SessionManager, TokenSource, LOGIN_PATH};
use crate::application::task_cache::TaskCacheController;
use crate::domain::forms::{ForgotPasswordForm, LoginForm, RegisterForm, ResetPasswordForm, TaskForm};
use crate::domain::models::{FieldErrors, Task, TaskId, TaskPage, TaskQuery, User};
use crate::infrastructure::api_transport::{ApiTransport, ReqwestApiTransport};
use crate::infrastructure::config::{AppConfig, CredentialBackend};
use crate::infrastructure::credential_store::{
    CredentialStore, FileCredentialStore, KeyringCredentialStore,
};
use crate::infrastructure::error::InfraError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const TASKS_PATH: &str = "/tasks";

type SharedSession<T> = Arc<SessionManager<T, dyn CredentialStore>>;

/// Everything one CLI invocation needs, wired against a single workspace.
pub struct AppState<T: ApiTransport + 'static = ReqwestApiTransport> {
    config: AppConfig,
    config_dir: PathBuf,
    navigator: Arc<RecordingNavigator>,
    session: SharedSession<T>,
    accounts: AccountService<T, dyn CredentialStore>,
    tasks: TaskCacheController<ApiClient<T>>,
    route_guard: RouteGuard,
}

impl AppState<ReqwestApiTransport> {
    pub fn new(workspace_root: PathBuf) -> Result<Self, InfraError> {
        let bootstrap = bootstrap_workspace(&workspace_root)?;
        let transport = Arc::new(ReqwestApiTransport::new(
            bootstrap.config.api_root()?,
            bootstrap.config.request_timeout,
        )?);
        let credential_store: Arc<dyn CredentialStore> = match bootstrap.config.credential_backend {
            CredentialBackend::File => Arc::new(FileCredentialStore::new(&bootstrap.credential_path)),
            CredentialBackend::Keyring => Arc::new(KeyringCredentialStore::default()),
        };
        Ok(Self::assemble(
            bootstrap.config,
            bootstrap.config_dir,
            transport,
            credential_store,
        ))
    }
}

impl<T: ApiTransport + 'static> AppState<T> {
    pub fn assemble(
        config: AppConfig,
        config_dir: PathBuf,
        transport: Arc<T>,
        credential_store: Arc<dyn CredentialStore>,
    ) -> Self {
        let navigator = Arc::new(RecordingNavigator::default());
        let session: SharedSession<T> = Arc::new(
            SessionManager::new(Arc::clone(&transport), credential_store, navigator.clone())
                .with_landing_path(config.landing_path.clone()),
        );
        let tokens: Arc<dyn TokenSource> = session.clone();
        let readiness_session = Arc::clone(&session);
        let tasks = TaskCacheController::new(Arc::new(ApiClient::new(Arc::clone(&transport), tokens)))
            .with_readiness(Arc::new(move || {
                readiness_session.is_resolved() && readiness_session.is_authenticated()
            }));
        let accounts = AccountService::new(transport, Arc::clone(&session));
        let route_guard = RouteGuard::new(config.session_secret.as_deref());

        Self {
            config,
            config_dir,
            navigator,
            session,
            accounts,
            tasks,
            route_guard,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn current_location(&self) -> Option<String> {
        self.navigator.current()
    }

    pub fn command_error(&self, command: &str, error: &InfraError) -> String {
        tracing::debug!(command, %error, "command failed");
        error.user_message()
    }

    /// Resolves the session and runs the `/tasks` guard, as a page load would.
    async fn open_tasks_view(&self) -> Result<(), InfraError> {
        self.session.resolve_session().await;
        let cookie = self.session.stored_credential()?.and_then(|credential| credential.session);
        if let RouteDecision::Redirect(target) = self.route_guard.check(TASKS_PATH, cookie.as_deref()) {
            self.navigator.replace(&target);
            return Err(InfraError::Unauthorized(format!("redirected to {target}")));
        }
        if !self.session.is_authenticated() {
            self.navigator.replace(LOGIN_PATH);
            return Err(InfraError::Unauthorized("session could not be resumed".to_string()));
        }
        Ok(())
    }

    async fn load_all(&self) -> Result<(), InfraError> {
        self.tasks.load(&TaskQuery::default()).await.map(|_| ())
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct LoginResult {
    pub email: String,
    pub destination: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct WhoAmIResponse {
    pub authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

pub async fn login_impl<T: ApiTransport + 'static>(
    state: &AppState<T>,
    email: String,
    password: String,
    next: Option<String>,
) -> Result<LoginResult, InfraError> {
    let form = LoginForm { email, password };
    let destination = state.accounts.login_user(&form, next.as_deref()).await?;
    Ok(LoginResult {
        email: form.email.trim().to_string(),
        destination,
    })
}

pub async fn register_impl<T: ApiTransport + 'static>(
    state: &AppState<T>,
    email: String,
    password: String,
    confirm_password: String,
) -> Result<User, InfraError> {
    let form = RegisterForm {
        email,
        password,
        confirm_password,
    };
    state.accounts.register_user(&form).await
}

pub async fn forgot_password_impl<T: ApiTransport + 'static>(state: &AppState<T>, email: String) -> Result<(), InfraError> {
    state.accounts.forgot_password(&ForgotPasswordForm { email }).await
}

pub async fn reset_password_impl<T: ApiTransport + 'static>(
    state: &AppState<T>,
    token: String,
    new_password: String,
    confirm_password: String,
) -> Result<(), InfraError> {
    let form = ResetPasswordForm {
        token,
        new_password,
        confirm_password,
    };
    state.accounts.reset_password(&form).await
}

/// Always succeeds locally; returns where the app navigated to.
pub async fn logout_impl<T: ApiTransport + 'static>(state: &AppState<T>) -> String {
    state.session.logout().await;
    state
        .current_location()
        .unwrap_or_else(|| LOGIN_PATH.to_string())
}

pub async fn whoami_impl<T: ApiTransport + 'static>(state: &AppState<T>) -> WhoAmIResponse {
    let session = state.session.resolve_session().await;
    WhoAmIResponse {
        authenticated: session.is_authenticated,
        email: session.user_email,
    }
}

pub async fn list_tasks_impl<T: ApiTransport + 'static>(
    state: &AppState<T>,
    query: TaskQuery,
) -> Result<TaskPage, InfraError> {
    state.open_tasks_view().await?;
    state.tasks.load(&query).await
}

pub async fn create_task_impl<T: ApiTransport + 'static>(state: &AppState<T>, form: TaskForm) -> Result<Task, InfraError> {
    let new_task = form.to_new_task().map_err(InfraError::Validation)?;
    state.open_tasks_view().await?;
    let created = state.tasks.create(new_task).await?;
    tracing::info!(task_id = %created.id, "task created");
    Ok(created)
}

pub async fn complete_task_impl<T: ApiTransport + 'static>(state: &AppState<T>, task_id: String) -> Result<Task, InfraError> {
    let id = parse_task_id(&task_id)?;
    state.open_tasks_view().await?;
    state.load_all().await?;
    state.tasks.complete(id).await
}

pub async fn update_task_impl<T: ApiTransport + 'static>(
    state: &AppState<T>,
    task_id: String,
    form: TaskForm,
) -> Result<Task, InfraError> {
    let id = parse_task_id(&task_id)?;
    let patch = form.to_patch().map_err(InfraError::Validation)?;
    state.open_tasks_view().await?;
    state.load_all().await?;
    state.tasks.update(id, patch).await
}

pub async fn delete_task_impl<T: ApiTransport + 'static>(state: &AppState<T>, task_id: String) -> Result<(), InfraError> {
    let id = parse_task_id(&task_id)?;
    state.open_tasks_view().await?;
    state.load_all().await?;
    state.tasks.delete(id.clone()).await?;
    tracing::info!(task_id = %id, "task deleted");
    Ok(())
}

fn parse_task_id(raw: &str) -> Result<TaskId, InfraError> {
    let id = raw
        .parse::<TaskId>()
        .map_err(|message| InfraError::Validation(FieldErrors::general(message)))?;
    if id.is_temporary() {
        return Err(InfraError::NotFound(format!("task {id}")));
    }
    Ok(id)
}

/// Renders a stored due date in the configured zone; unparseable values pass through.
pub fn format_due_date(config: &AppConfig, raw: &str) -> String {
    let Ok(parsed) = DateTime::parse_from_rfc3339(raw) else {
        return raw.to_string();
    };
    let utc = parsed.with_timezone(&Utc);
    match config
        .timezone
        .as_deref()
        .and_then(|name| name.parse::<chrono_tz::Tz>().ok())
    {
        Some(zone) => utc.with_timezone(&zone).format("%Y-%m-%d %H:%M %Z").to_string(),
        None => utc.format("%Y-%m-%d %H:%M UTC").to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::bootstrap::bootstrap_workspace;
    use crate::domain::models::RefreshCredential;
    use crate::infrastructure::api_transport::{ApiRequest, ApiResponse};
    use crate::infrastructure::credential_store::InMemoryCredentialStore;
    use crate::test_support::ScriptedTransport;
    use std::fs;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    static NEXT_TEMP_WORKSPACE: AtomicUsize = AtomicUsize::new(0);

    struct TempWorkspace {
        path: PathBuf,
    }

    impl TempWorkspace {
        fn new() -> Self {
            let sequence = NEXT_TEMP_WORKSPACE.fetch_add(1, Ordering::Relaxed);
            let path = std::env::temp_dir().join(format!(
                "taskdesk-command-tests-{}-{}",
                std::process::id(),
                sequence
            ));
            fs::create_dir_all(&path).expect("create temp workspace");
            Self { path }
        }

        fn app_state<F>(&self, store: Arc<InMemoryCredentialStore>, handler: F) -> AppState<ScriptedTransport>
        where
            F: Fn(&ApiRequest) -> Result<ApiResponse, InfraError> + Send + Sync + 'static,
        {
            let bootstrap = bootstrap_workspace(&self.path).expect("bootstrap workspace");
            AppState::assemble(
                bootstrap.config,
                bootstrap.config_dir,
                Arc::new(ScriptedTransport::new(handler)),
                store,
            )
        }
    }

    impl Drop for TempWorkspace {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.path);
        }
    }

    fn logged_in_store() -> Arc<InMemoryCredentialStore> {
        Arc::new(InMemoryCredentialStore::with_credential(RefreshCredential {
            refresh_token: Some("r-1".to_string()),
            csrf_token: Some("c-1".to_string()),
            session: Some("s-1".to_string()),
        }))
    }

    fn task_json(id: i64, title: &str, completed: bool) -> String {
        format!(r#"{{"id":{id},"title":"{title}","priority":"LOW","is_completed":{completed}}}"#)
    }

    /// Backend with a valid refresh cookie and one stored task.
    fn backend(request: &ApiRequest) -> Result<ApiResponse, InfraError> {
        match (request.method.as_str(), request.path().as_str()) {
            ("POST", "/users/refresh") => Ok(ApiResponse::new(200, r#"{"access_token":"a-1","token_type":"bearer"}"#)),
            ("POST", "/users/verify") => Ok(ApiResponse::new(200, r#"{"id":1,"email":"ada@example.com"}"#)),
            ("GET", "/tasks/user") => Ok(ApiResponse::new(200, format!("[{}]", task_json(1, "Read", false)))),
            ("PATCH", "/tasks/1") => Ok(ApiResponse::new(200, task_json(1, "Read", true))),
            ("POST", "/tasks") => Ok(ApiResponse::new(200, task_json(2, "Write", false))),
            ("DELETE", "/tasks/1") => Ok(ApiResponse::new(200, task_json(1, "Read", false))),
            (method, path) => panic!("unexpected {method} {path}"),
        }
    }

    #[test]
    fn bootstrap_writes_default_config() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state(Arc::new(InMemoryCredentialStore::default()), backend);
        assert!(state.config_dir().join("app.json").exists());
        assert_eq!(state.config().landing_path, "/");
    }

    #[tokio::test]
    async fn create_task_rejects_empty_title_before_any_request() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state(logged_in_store(), |request| {
            panic!("unexpected request to {}", request.path())
        });
        let form = TaskForm {
            title: "   ".to_string(),
            ..TaskForm::default()
        };
        match create_task_impl(&state, form).await {
            Err(InfraError::Validation(errors)) => assert_eq!(errors.get("title"), Some("Title is required.")),
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn tasks_without_session_redirect_to_login() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state(Arc::new(InMemoryCredentialStore::default()), |request| {
            assert_eq!(request.path(), "/users/refresh");
            Ok(ApiResponse::new(401, r#"{"detail":"Missing refresh token."}"#))
        });

        let error = list_tasks_impl(&state, TaskQuery::default()).await.expect_err("guarded");
        assert!(error.is_unauthorized());
        assert_eq!(state.current_location().as_deref(), Some("/login?next=%2Ftasks"));
    }

    #[tokio::test]
    async fn resumed_session_lists_and_completes_tasks() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state(logged_in_store(), backend);

        let whoami = whoami_impl(&state).await;
        assert!(whoami.authenticated);
        assert_eq!(whoami.email.as_deref(), Some("ada@example.com"));

        let page = list_tasks_impl(&state, TaskQuery::default()).await.expect("list");
        assert_eq!(page.items.len(), 1);

        let completed = complete_task_impl(&state, "1".to_string()).await.expect("complete");
        assert!(completed.is_completed);

        let created = create_task_impl(
            &state,
            TaskForm {
                title: "Write".to_string(),
                priority: "high".to_string(),
                ..TaskForm::default()
            },
        )
        .await
        .expect("create");
        assert_eq!(created.id, TaskId::from(2));

        delete_task_impl(&state, "1".to_string()).await.expect("delete");
    }

    #[tokio::test]
    async fn expired_access_token_is_refreshed_mid_session() {
        let refreshed = Arc::new(AtomicUsize::new(0));
        let reject_old = Arc::new(AtomicBool::new(true));
        let workspace = TempWorkspace::new();
        let counter = Arc::clone(&refreshed);
        let reject = Arc::clone(&reject_old);
        let state = workspace.app_state(logged_in_store(), move |request| match request.path().as_str() {
            "/users/refresh" => {
                let call = counter.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(ApiResponse::new(200, format!(r#"{{"access_token":"a-{call}","token_type":"bearer"}}"#)))
            }
            "/tasks/user" if request.bearer.as_deref() == Some("a-1") && reject.swap(false, Ordering::SeqCst) => {
                Ok(ApiResponse::new(401, r#"{"detail":"Could not validate credentials"}"#))
            }
            _ => backend(request),
        });

        let page = list_tasks_impl(&state, TaskQuery::default()).await.expect("list after refresh");
        assert_eq!(page.items.len(), 1);
        assert_eq!(refreshed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn logout_clears_session_and_lands_on_login() {
        let workspace = TempWorkspace::new();
        let store = logged_in_store();
        let state = workspace.app_state(Arc::clone(&store), |request| match request.path().as_str() {
            "/users/logout" => Ok(ApiResponse::new(403, r#"{"detail":"CSRF token missing."}"#)),
            _ => backend(request),
        });

        assert!(whoami_impl(&state).await.authenticated);
        assert_eq!(logout_impl(&state).await, LOGIN_PATH);
        assert_eq!(store.load_credential().expect("load"), None);
        assert!(!state.session.is_authenticated());
    }

    #[tokio::test]
    async fn temporary_ids_are_never_sent() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state(logged_in_store(), |request| {
            panic!("unexpected request to {}", request.path())
        });
        assert!(matches!(
            delete_task_impl(&state, "temp-3".to_string()).await,
            Err(InfraError::NotFound(_))
        ));
    }

    #[test]
    fn due_dates_render_in_configured_zone() {
        let workspace = TempWorkspace::new();
        let mut config = bootstrap_workspace(&workspace.path).expect("bootstrap").config;
        config.timezone = Some("Asia/Tokyo".to_string());
        assert_eq!(format_due_date(&config, "2026-03-01T15:30:00Z"), "2026-03-02 00:30 JST");
        config.timezone = None;
        assert_eq!(format_due_date(&config, "2026-03-01T15:30:00Z"), "2026-03-01 15:30 UTC");
        assert_eq!(format_due_date(&config, "someday"), "someday");
    }
}
