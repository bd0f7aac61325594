use std::io::{self, BufRead, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use animask_contracts::chat::{parse_intent, Intent, CHAT_HELP_COMMANDS};
use animask_contracts::events::{EventPayload, EventWriter};
use animask_contracts::session::{Effect, ImageFile, Session, SessionEvent, SessionState};
use animask_contracts::settings::{mask_api_key, CredentialStore};
use animask_engine::config::{Environment, ServerConfig, DEFAULT_ENDPOINT_URL};
use animask_engine::intake::{image_file_from_pasted, read_image_file, write_download};
use animask_engine::{
    DirectClient, EndpointClient, GeminiImageModel, ImageProcessor, ProcessingEndpoint,
    ProcessingServer, SessionDriver,
};
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use uuid::Uuid;

const INPUT_POLL_INTERVAL: Duration = Duration::from_millis(200);
const DRAIN_TIMEOUT: Duration = Duration::from_secs(300);
const CLIENT_TIMEOUT_SLACK: Duration = Duration::from_secs(10);

#[derive(Debug, Parser)]
#[command(name = "animask", version, about = "Cover faces with cartoon animal heads")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the processing endpoint.
    Serve(ServeArgs),
    /// Interactive upload / retry / history session.
    App(AppArgs),
    /// Manage the locally stored model key.
    Key(KeyArgs),
}

#[derive(Debug, Parser)]
struct ServeArgs {
    #[arg(long)]
    bind: Option<String>,
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long, default_value = ".env")]
    dotenv: PathBuf,
}

#[derive(Debug, Parser)]
struct AppArgs {
    #[arg(long, default_value = DEFAULT_ENDPOINT_URL)]
    endpoint: String,
    /// Call the model directly instead of going through an endpoint.
    #[arg(long)]
    direct: bool,
    #[arg(long)]
    settings: Option<PathBuf>,
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long, default_value = ".")]
    out: PathBuf,
    #[arg(long, default_value = ".env")]
    dotenv: PathBuf,
}

#[derive(Debug, Parser)]
struct KeyArgs {
    #[command(subcommand)]
    action: KeyAction,
    #[arg(long, global = true)]
    settings: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum KeyAction {
    Set { key: String },
    Clear,
    Show,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("animask error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Serve(args) => run_serve(args),
        Command::App(args) => run_app(args),
        Command::Key(args) => run_key(args),
    }
}

fn run_serve(args: ServeArgs) -> Result<i32> {
    let env = Environment::load(Some(&args.dotenv));
    let mut config = ServerConfig::from_env(&env);
    if let Some(bind) = args.bind {
        config.bind = bind;
    }
    if let Some(events) = args.events {
        config.events_path = Some(events);
    }
    if config.api_key.is_none() {
        eprintln!("animask: GEMINI_API_KEY is not set; every request will fail with 500");
    }

    let events = match config.events_path.as_ref() {
        Some(path) => EventWriter::new(path, "server"),
        None => EventWriter::disabled("server"),
    };
    let model = GeminiImageModel::new(&config.api_base, &config.model, config.upstream_timeout);
    let endpoint = ProcessingEndpoint::new(Box::new(model), config.api_key.clone(), events);
    let server = ProcessingServer::bind(&config.bind, endpoint)?;

    let addr = server
        .local_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_else(|| config.bind.clone());
    println!("animask serving http://{addr}/api/process-image (model {})", config.model);
    server.run();
    Ok(0)
}

fn run_key(args: KeyArgs) -> Result<i32> {
    let path = settings_path(args.settings.as_deref())?;
    let mut store = CredentialStore::load(path);
    match args.action {
        KeyAction::Set { key } => {
            store.set_api_key(&key)?;
            println!("Key saved to {}", store.path().display());
        }
        KeyAction::Clear => {
            store.clear_api_key()?;
            println!("Key cleared.");
        }
        KeyAction::Show => match store.api_key() {
            Some(key) => println!("{}", mask_api_key(key)),
            None => println!("No key stored."),
        },
    }
    Ok(0)
}

fn settings_path(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }
    let base = dirs::config_dir().context("no config directory on this platform; pass --settings")?;
    Ok(base.join("animask").join("settings.json"))
}

/// How the app reaches the model.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Route {
    Direct { api_key: String },
    Endpoint { url: String },
}

/// A stored key always wins. `--direct` without one falls back to the
/// server-side environment key.
fn choose_route(
    stored_key: Option<&str>,
    direct: bool,
    env_key: Option<&str>,
    endpoint: &str,
) -> Result<Route> {
    if let Some(key) = stored_key {
        return Ok(Route::Direct {
            api_key: key.to_string(),
        });
    }
    if direct {
        let Some(key) = env_key else {
            bail!("--direct needs a stored key (/key or `animask key set`) or GEMINI_API_KEY");
        };
        return Ok(Route::Direct {
            api_key: key.to_string(),
        });
    }
    Ok(Route::Endpoint {
        url: endpoint.to_string(),
    })
}

struct App {
    driver: SessionDriver,
    store: CredentialStore,
    config: ServerConfig,
    args: AppArgs,
    route: Route,
}

impl App {
    fn new(args: AppArgs) -> Result<Self> {
        let env = Environment::load(Some(&args.dotenv));
        let config = ServerConfig::from_env(&env);
        let store = CredentialStore::load(settings_path(args.settings.as_deref())?);
        let events = match args.events.as_ref() {
            Some(path) => EventWriter::new(path, format!("app-{}", Uuid::new_v4())),
            None => EventWriter::disabled("app"),
        };

        let route = choose_route(
            store.api_key(),
            args.direct,
            config.api_key.as_deref(),
            &args.endpoint,
        )?;
        let processor = build_processor(&route, &config);
        let mut payload = EventPayload::new();
        payload.insert("route".to_string(), Value::from(route_label(&route)));
        payload.insert("processor".to_string(), Value::from(processor.name()));
        events.emit("app_started", payload)?;

        Ok(Self {
            driver: SessionDriver::new(processor, events),
            store,
            config,
            args,
            route,
        })
    }

    fn reroute(&mut self) -> Result<()> {
        let route = choose_route(
            self.store.api_key(),
            self.args.direct,
            self.config.api_key.as_deref(),
            &self.args.endpoint,
        )?;
        self.driver.set_processor(build_processor(&route, &self.config));
        self.route = route;
        Ok(())
    }

    /// Returns `false` when the user asked to quit.
    fn handle(&mut self, intent: &Intent) -> Result<bool> {
        match intent.action.as_str() {
            "noop" => return Ok(true),
            "quit" => return Ok(false),
            "help" => println!("Commands: {}", CHAT_HELP_COMMANDS.join(" ")),
            "open" => {
                let Some(path) = intent.arg_str("path") else {
                    println!("/open requires a path");
                    return Ok(true);
                };
                match read_image_file(Path::new(path)) {
                    Ok(file) => self.submit(file),
                    Err(err) => println!("Could not open {path}: {err:#}"),
                }
            }
            "paste" => match image_file_from_pasted(intent.arg_str("data_url").unwrap_or("")) {
                Ok(file) => self.submit(file),
                Err(err) => println!("Paste failed: {err:#}"),
            },
            "retry" => {
                if self.driver.session().state() != SessionState::Result {
                    println!("Nothing to retry yet.");
                } else if self.driver.session().is_retrying() {
                    println!("A retry is already running.");
                } else {
                    self.driver.dispatch(SessionEvent::Retry);
                    self.render();
                }
            }
            "reset" => match self.driver.dispatch(SessionEvent::Reset) {
                Effect::Refused(err) => println!("Cannot reset now: {err}."),
                _ => self.render(),
            },
            "history" => print_history(self.driver.session()),
            "load_history" => {
                let len = self.driver.session().history().len();
                let refused = match intent.arg_index("index") {
                    Some(index) => match self.driver.dispatch(SessionEvent::LoadFromHistory(index)) {
                        Effect::Refused(err) => Some(err.to_string()),
                        _ => None,
                    },
                    None => Some("no history number given".to_string()),
                };
                match refused {
                    Some(reason) => println!(
                        "/load requires a history number between 1 and {len} ({reason})"
                    ),
                    None => self.render(),
                }
            }
            "download" => self.download(intent)?,
            "set_key" => {
                let Some(key) = intent.arg_str("key") else {
                    println!("/key requires a value");
                    return Ok(true);
                };
                if let Err(err) = self.store.set_api_key(key) {
                    println!("Could not save key: {err:#}");
                    return Ok(true);
                }
                match self.reroute() {
                    Ok(()) => {
                        println!("Key saved ({}). Calling the model directly.", mask_api_key(key))
                    }
                    Err(err) => println!("Key saved, but routing failed: {err:#}"),
                }
            }
            "clear_key" => {
                if let Err(err) = self.store.clear_api_key() {
                    println!("Could not clear key: {err:#}");
                    return Ok(true);
                }
                match self.reroute() {
                    Ok(()) => println!("Key cleared. Using {}.", route_label(&self.route)),
                    Err(err) => {
                        // Never keep calling the model with a cleared key.
                        self.route = Route::Endpoint {
                            url: self.args.endpoint.clone(),
                        };
                        self.driver
                            .set_processor(build_processor(&self.route, &self.config));
                        println!("Key cleared; {err:#}. Using {}.", route_label(&self.route));
                    }
                }
            }
            "status" => self.print_status(),
            "unknown" => println!(
                "Unknown command: /{}. Type /help.",
                intent.arg_str("command").unwrap_or("")
            ),
            other => println!("Unhandled action: {other}"),
        }
        Ok(true)
    }

    fn submit(&mut self, file: ImageFile) {
        self.driver.dispatch(SessionEvent::Submit(file));
        self.render();
    }

    fn download(&self, intent: &Intent) -> Result<()> {
        let processed = self.driver.session().processed();
        let Some(image) = intent
            .arg_index("index")
            .and_then(|index| processed.get(index))
        else {
            println!(
                "/download requires a result number between 1 and {}",
                processed.len()
            );
            return Ok(());
        };
        let explicit = intent.arg_str("path").map(PathBuf::from);
        match write_download(image, &self.args.out, explicit.as_deref()) {
            Ok(path) => println!("Saved {}", path.display()),
            Err(err) => println!("Download failed: {err:#}"),
        }
        Ok(())
    }

    fn print_status(&self) {
        let session = self.driver.session();
        println!("state: {}", session.state());
        println!("route: {}", route_label(&self.route));
        println!("processor: {}", self.driver.processor_name());
        println!(
            "key: {}",
            self.store
                .api_key()
                .map(mask_api_key)
                .unwrap_or_else(|| "none".to_string())
        );
        println!("results: {}", session.processed().len());
        println!("history: {}", session.history().len());
        println!("pending: {}", self.driver.pending());
    }

    fn render(&self) {
        println!("{}", render_session(self.driver.session()));
    }

    fn collect_completions(&mut self) {
        if self.driver.pump() > 0 {
            self.render();
        }
    }
}

fn build_processor(route: &Route, config: &ServerConfig) -> Arc<dyn ImageProcessor> {
    match route {
        Route::Direct { api_key } => {
            let model = GeminiImageModel::new(&config.api_base, &config.model, config.upstream_timeout);
            Arc::new(DirectClient::new(Arc::new(model), api_key.clone()))
        }
        Route::Endpoint { url } => Arc::new(EndpointClient::new(
            url.clone(),
            config.upstream_timeout + CLIENT_TIMEOUT_SLACK,
        )),
    }
}

fn route_label(route: &Route) -> String {
    match route {
        Route::Direct { .. } => "direct model call".to_string(),
        Route::Endpoint { url } => format!("endpoint {url}"),
    }
}

fn render_session(session: &Session) -> String {
    match session.state() {
        SessionState::Initial => {
            "Ready. Drop an image path, /open <path> or /paste <data-url>.".to_string()
        }
        SessionState::Loading => "Processing image...".to_string(),
        SessionState::Error => format!(
            "Error: {}",
            session.error().unwrap_or("Something went wrong.")
        ),
        SessionState::Result => {
            let mut lines = vec![format!(
                "Result: {} image(s). /download <n>, /retry, /reset.",
                session.processed().len()
            )];
            if session.is_retrying() {
                lines.push("Retrying...".to_string());
            }
            if let Some(notice) = session.notice() {
                lines.push(format!("Retry failed: {notice}"));
            }
            lines.join("\n")
        }
    }
}

fn print_history(session: &Session) {
    if session.history().is_empty() {
        println!("History is empty.");
        return;
    }
    for (idx, item) in session.history().iter().enumerate() {
        println!(
            "{}. {} with {} result(s)",
            idx + 1,
            item.mime_type,
            item.processed.len()
        );
    }
}

fn spawn_stdin_reader() -> Result<Receiver<String>> {
    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name("animask-stdin".to_string())
        .spawn(move || {
            let stdin = io::stdin();
            let mut line = String::new();
            loop {
                line.clear();
                match stdin.lock().read_line(&mut line) {
                    Ok(0) => break,
                    Ok(_) => {
                        let input = line.trim_end_matches(['\n', '\r']).to_string();
                        if tx.send(input).is_err() {
                            break;
                        }
                    }
                    Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                    Err(err) => {
                        eprintln!("animask: stdin read failed: {err}");
                        break;
                    }
                }
            }
        })
        .context("failed to start stdin reader")?;
    Ok(rx)
}

fn prompt() -> Result<()> {
    print!("> ");
    io::stdout().flush()?;
    Ok(())
}

fn run_app(args: AppArgs) -> Result<i32> {
    let mut app = App::new(args)?;
    let lines = spawn_stdin_reader()?;

    println!(
        "Animask started ({}). Type /help for commands.",
        route_label(&app.route)
    );
    app.render();
    prompt()?;

    loop {
        match lines.recv_timeout(INPUT_POLL_INTERVAL) {
            Ok(input) => {
                app.collect_completions();
                let intent = parse_intent(&input);
                if !app.handle(&intent)? {
                    break;
                }
                prompt()?;
            }
            Err(RecvTimeoutError::Timeout) => {
                if app.driver.pending() > 0 && app.driver.pump() > 0 {
                    app.render();
                    prompt()?;
                }
            }
            Err(RecvTimeoutError::Disconnected) => {
                // Input closed (piped script); let running calls land first.
                while app.driver.pending() > 0 && app.driver.wait(DRAIN_TIMEOUT) {
                    app.render();
                }
                println!();
                break;
            }
        }
    }
    Ok(0)
}
