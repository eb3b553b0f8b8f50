use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use portal::config::{ConfigError, PortalConfig};
use portal::dashboard;
use portal::export::{DirectorySink, ExportError, ExportPoller, ExportSnapshot, ExportStatus};
use portal::guard::{self, Access, Dashboard, NavItem, Route};
use portal::net::types::{Registration, RequestStatus, Role, ServiceInput};
use portal::net::{ApiClient, ApiError};
use portal::session::{Session, SessionError, SessionStore};

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Export(#[from] ExportError),
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("not logged in; run `portal login` first")]
    LoginRequired,
    #[error("already logged in; run `portal logout` first")]
    AlreadyLoggedIn,
    #[error("{0} requires an admin session")]
    Forbidden(Route),
    #[error("this command is for {0} accounts")]
    WrongRole(Role),
    #[error("professionals must pass --service-type and --experience-years")]
    MissingProfessionalDetails,
}

#[derive(Parser, Debug)]
#[command(name = "portal", about = "Home-services marketplace client")]
struct Cli {
    #[arg(long, env = "PORTAL_BASE_URL")]
    base_url: Option<String>,

    #[arg(long, env = "PORTAL_AUTH_TOKEN", hide_env_values = true)]
    token: Option<String>,

    #[arg(long, env = "PORTAL_ROLE")]
    role: Option<Role>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sign in and store the session.
    Login {
        #[arg(long)]
        email: String,
        #[arg(long, env = "PORTAL_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Forget the stored session.
    Logout,
    Register(RegisterArgs),
    /// Show the stored session, its navigation and dashboard.
    Whoami,
    Users(UsersCommand),
    Services(ServicesCommand),
    /// Book a service as a customer.
    Book { service_id: i64 },
    /// List the customer's own bookings.
    MyServices,
    Requests(RequestsCommand),
    /// Review a completed booking.
    Review { request_id: i64, review: String },
    /// Cancel a booking.
    Cancel { request_id: i64 },
    /// Closed services with customer and professional emails (admin).
    Closed,
    /// Generate the closed-services CSV and save it locally (admin).
    Export {
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },
}

#[derive(Args, Debug)]
struct RegisterArgs {
    #[arg(long)]
    email: String,
    #[arg(long)]
    username: String,
    #[arg(long, env = "PORTAL_PASSWORD", hide_env_values = true)]
    password: String,
    #[arg(long)]
    role: Role,
    #[arg(long)]
    location: String,
    #[arg(long)]
    pincode: String,
    #[arg(long)]
    service_type: Option<String>,
    #[arg(long)]
    experience_years: Option<u32>,
    #[arg(long)]
    document_url: Option<String>,
}

#[derive(Args, Debug)]
struct UsersCommand {
    #[command(subcommand)]
    command: UsersSubcommand,
}

#[derive(Subcommand, Debug)]
enum UsersSubcommand {
    /// Professionals and customers, grouped.
    List,
    /// Flip a user's active flag.
    Toggle { user_id: i64 },
}

#[derive(Args, Debug)]
struct ServicesCommand {
    #[command(subcommand)]
    command: ServicesSubcommand,
}

#[derive(Subcommand, Debug)]
enum ServicesSubcommand {
    List {
        #[arg(long, default_value = "")]
        search: String,
    },
    Create(ServiceArgs),
    Update {
        service_id: i64,
        #[command(flatten)]
        service: ServiceArgs,
    },
    Delete {
        service_id: i64,
    },
}

#[derive(Args, Debug)]
struct ServiceArgs {
    #[arg(long)]
    name: String,
    #[arg(long)]
    price: f64,
    #[arg(long)]
    time_required: Option<i64>,
    #[arg(long)]
    description: Option<String>,
}

impl From<ServiceArgs> for ServiceInput {
    fn from(args: ServiceArgs) -> Self {
        Self {
            name: args.name,
            price: args.price,
            time_required: args.time_required,
            description: args.description,
        }
    }
}

#[derive(Args, Debug)]
struct RequestsCommand {
    #[command(subcommand)]
    command: RequestsSubcommand,
}

#[derive(Subcommand, Debug)]
enum RequestsSubcommand {
    /// The professional's assigned requests, split into active and closed.
    List,
    /// Move a request to a new status.
    Status { request_id: i64, status: RequestStatus },
}

struct CliContext {
    config: PortalConfig,
    store: SessionStore,
    session: Session,
}

impl CliContext {
    fn client(&self) -> Result<ApiClient, CliError> {
        Ok(ApiClient::new(&self.config, Arc::new(self.session.clone()))?)
    }

    fn require(&self, route: Route) -> Result<(), CliError> {
        match guard::check(route, &self.session) {
            Access::Allow => Ok(()),
            Access::RedirectToLogin => Err(CliError::LoginRequired),
            Access::RedirectHome => Err(CliError::AlreadyLoggedIn),
            Access::Forbidden => Err(CliError::Forbidden(route)),
        }
    }

    /// Reject a command meant for another role. Sessions without a known
    /// role are let through for the server to decide.
    fn require_dashboard(&self, wanted: Dashboard, role: Role) -> Result<(), CliError> {
        if !self.session.is_logged_in() {
            return Err(CliError::LoginRequired);
        }
        match guard::dashboard_for(&self.session) {
            Some(dashboard) if dashboard != wanted => Err(CliError::WrongRole(role)),
            _ => Ok(()),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = PortalConfig::from_env()?;
    if let Some(base_url) = &cli.base_url {
        config = config.with_base_url(base_url)?;
    }
    let store = SessionStore::new(config.session_file.clone());
    let session = store.load()?.with_overrides(cli.token, cli.role);
    let ctx = CliContext { config, store, session };

    match cli.command {
        Command::Login { email, password } => run_login(&ctx, &email, &password).await,
        Command::Logout => {
            ctx.store.clear()?;
            print_json(&json!({ "message": "Logged out" }))
        }
        Command::Register(args) => run_register(&ctx, args).await,
        Command::Whoami => run_whoami(&ctx),
        Command::Users(users) => run_users(&ctx, users).await,
        Command::Services(services) => run_services(&ctx, services).await,
        Command::Book { service_id } => {
            ctx.require_dashboard(Dashboard::Customer, Role::Customer)?;
            print_json(&ctx.client()?.book_service(service_id).await?)
        }
        Command::MyServices => {
            ctx.require_dashboard(Dashboard::Customer, Role::Customer)?;
            print_json(&ctx.client()?.my_services().await?)
        }
        Command::Requests(requests) => run_requests(&ctx, requests).await,
        Command::Review { request_id, review } => {
            ctx.require_dashboard(Dashboard::Customer, Role::Customer)?;
            print_json(&ctx.client()?.submit_review(request_id, &review).await?)
        }
        Command::Cancel { request_id } => {
            let update = ctx
                .client()?
                .update_request_status(request_id, RequestStatus::Cancelled)
                .await?;
            print_json(&update)
        }
        Command::Closed => run_closed(&ctx).await,
        Command::Export { out_dir } => run_export(&ctx, out_dir).await,
    }
}

async fn run_login(ctx: &CliContext, email: &str, password: &str) -> Result<(), CliError> {
    ctx.require(Route::Login)?;
    let login = ctx.client()?.login(email, password).await?;
    let session = Session::from_login(&login);
    ctx.store.save(&session)?;
    tracing::info!(email = %login.email, role = %login.roles, "logged in");
    print_json(&json!({
        "email": login.email,
        "role": login.roles,
        "active": login.active,
        "id": login.id,
    }))
}

async fn run_register(ctx: &CliContext, args: RegisterArgs) -> Result<(), CliError> {
    ctx.require(Route::Register)?;
    if args.role == Role::Professional && (args.service_type.is_none() || args.experience_years.is_none()) {
        return Err(CliError::MissingProfessionalDetails);
    }
    let registration = Registration {
        email: args.email,
        username: args.username,
        password: args.password,
        role: args.role,
        location: args.location,
        pincode: args.pincode,
        service_type: args.service_type,
        experience_years: args.experience_years,
        document_url: args.document_url,
    };
    print_json(&ctx.client()?.register(&registration).await?)
}

fn run_whoami(ctx: &CliContext) -> Result<(), CliError> {
    let navigation: Vec<&str> = guard::navigation(&ctx.session)
        .into_iter()
        .map(|item| match item {
            NavItem::Link(route) => route.path(),
            NavItem::Logout => "logout",
        })
        .collect();
    let dashboard = guard::dashboard_for(&ctx.session).map(|dashboard| match dashboard {
        Dashboard::Customer => "customer",
        Dashboard::Professional => "professional",
        Dashboard::Admin => "admin",
    });
    print_json(&json!({
        "logged_in": ctx.session.is_logged_in(),
        "role": ctx.session.role,
        "user_id": ctx.session.user_id,
        "dashboard": dashboard,
        "navigation": navigation,
        "session_file": ctx.store.path(),
        "base_url": ctx.config.base_url,
    }))
}

async fn run_users(ctx: &CliContext, users: UsersCommand) -> Result<(), CliError> {
    ctx.require(Route::Users)?;
    let client = ctx.client()?;
    match users.command {
        UsersSubcommand::List => {
            let users = client.list_users().await?;
            print_json(&dashboard::group_users(&users))
        }
        UsersSubcommand::Toggle { user_id } => print_json(&client.toggle_user_activation(user_id).await?),
    }
}

async fn run_services(ctx: &CliContext, services: ServicesCommand) -> Result<(), CliError> {
    match services.command {
        ServicesSubcommand::List { search } => {
            let services = ctx.client()?.list_services().await?;
            print_json(&dashboard::search_services(&services, &search))
        }
        ServicesSubcommand::Create(service) => {
            ctx.require(Route::Services)?;
            print_json(&ctx.client()?.create_service(&service.into()).await?)
        }
        ServicesSubcommand::Update { service_id, service } => {
            ctx.require(Route::Services)?;
            print_json(&ctx.client()?.update_service(service_id, &service.into()).await?)
        }
        ServicesSubcommand::Delete { service_id } => {
            ctx.require(Route::Services)?;
            print_json(&ctx.client()?.delete_service(service_id).await?)
        }
    }
}

async fn run_requests(ctx: &CliContext, requests: RequestsCommand) -> Result<(), CliError> {
    match requests.command {
        RequestsSubcommand::List => {
            ctx.require_dashboard(Dashboard::Professional, Role::Professional)?;
            let requests = ctx.client()?.my_requests().await?;
            let (active, closed) = dashboard::split_requests(&requests);
            print_json(&json!({ "active": active, "closed": closed }))
        }
        RequestsSubcommand::Status { request_id, status } => {
            print_json(&ctx.client()?.update_request_status(request_id, status).await?)
        }
    }
}

async fn run_closed(ctx: &CliContext) -> Result<(), CliError> {
    ctx.require(Route::Users)?;
    let client = ctx.client()?;
    let services = client.closed_services().await?;
    let users = client.list_users().await?;
    print_json(&dashboard::closed_service_rows(&services, &users))
}

async fn run_export(ctx: &CliContext, out_dir: Option<PathBuf>) -> Result<(), CliError> {
    ctx.require(Route::Users)?;
    let dir = out_dir.unwrap_or_else(|| ctx.config.export_dir.clone());
    let (events_tx, mut events_rx) = mpsc::unbounded_channel::<ExportSnapshot>();
    let printer = tokio::spawn(async move {
        let mut last = None;
        while let Some(snapshot) = events_rx.recv().await {
            if let Some(message) = snapshot.message {
                if last.as_ref() != Some(&message.text) {
                    eprintln!("{}", message.text);
                    last = Some(message.text);
                }
            }
        }
    });

    let mut poller = ExportPoller::new(
        Arc::new(ctx.client()?),
        Arc::new(DirectorySink::new(dir)),
        ctx.config.poll,
    )
    .with_events(events_tx);

    let started = poller.start_export().await;
    let outcome = poller.wait_until_settled().await;
    drop(poller);
    if printer.await.is_err() {
        tracing::debug!("export progress printer stopped early");
    }
    started?;

    match (outcome.status, outcome.saved_to, outcome.error) {
        (ExportStatus::Succeeded, Some(path), _) => print_json(&json!({
            "task_id": outcome.task_id,
            "polls": outcome.polls,
            "saved_to": path,
        })),
        (_, _, Some(error)) => Err(error.into()),
        (status, _, None) => Err(ExportError::PollFailed(format!("export ended as {status:?}")).into()),
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}

#[cfg(test)]
#[path = "main_test.rs"]
mod tests;
