mod admin;
mod auth;
mod backend;
mod config;
mod db;
mod draft_store;
mod error;
mod exiftool;
mod export;
mod map;
mod media;
mod models;
mod schema;
mod steps;
mod storage;
mod submission;
mod validation;

use crate::admin::AdminService;
use crate::auth::AuthUser;
use crate::backend::{HttpBackend, LocalBackend, SightingBackend};
use crate::config::{AppPaths, BackendMode, Settings};
use crate::db::DbPool;
use crate::draft_store::{DraftStore, FileDraftStorage, ProgressStore};
use crate::error::{Error, Result};
use crate::exiftool::ExifTool;
use crate::export::ExportFormat;
use crate::media::MediaPipeline;
use crate::models::{DraftPatch, ExportFilter, MediaFile, SightingDraft};
use crate::steps::{default_steps, FlowState, StepController};
use crate::storage::{LocalStorage, MediaStorage};
use crate::submission::SubmissionClient;
use crate::validation::ValidationSchema;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "ostsee-sightings")]
#[command(about = "Report, review and export marine-animal sightings", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the data directory, database and default settings
    Init,

    /// Work on the report that has not been sent yet
    Draft {
        #[command(subcommand)]
        action: DraftAction,
    },

    /// Send the current draft
    Submit,

    /// Review sightings (requires the admin role)
    Admin {
        /// Decoded ID-token claims of the signed-in user (JSON file)
        #[arg(long)]
        claims: PathBuf,

        #[command(subcommand)]
        action: AdminAction,
    },

    /// Export stored sightings
    Export {
        #[arg(short, long, value_enum, default_value = "json")]
        format: ExportFormat,
        /// First observation day, YYYY-MM-DD
        #[arg(long)]
        from: Option<NaiveDate>,
        /// Last observation day, YYYY-MM-DD
        #[arg(long)]
        to: Option<NaiveDate>,
        /// Include unverified sightings (requires the admin role)
        #[arg(long, requires = "claims")]
        all: bool,
        /// Decoded ID-token claims of the signed-in user (JSON file)
        #[arg(long)]
        claims: Option<PathBuf>,
        /// Output file; stdout when omitted
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Write the GeoJSON feed for the public map
    Map {
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum DraftAction {
    /// Show the draft and the state of each step
    Show,
    /// Merge a JSON patch into the draft; `null` clears a field
    Set {
        /// Patch as inline JSON
        #[arg(long, conflicts_with = "file")]
        json: Option<String>,
        /// Patch read from a file
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Attach a photo
    Attach {
        path: PathBuf,
        /// The photo was taken on the position step
        #[arg(long)]
        position: bool,
    },
    /// Remove the attachment at INDEX
    Detach { index: usize },
    /// Check the current step and move on to the next one
    Next,
    /// Go back one step without checking anything
    Back,
    /// Move to a step, if every earlier step is complete
    Goto { step: usize },
    /// Throw the draft away
    Clear,
}

#[derive(Subcommand)]
enum AdminAction {
    /// List sightings
    List {
        #[arg(long)]
        unverified: bool,
    },
    /// Show one sighting
    Show { id: i64 },
    /// Mark a sighting as verified
    Verify { id: i64 },
    /// Withdraw verification
    Unverify { id: i64 },
    /// Delete a sighting and its photos
    Delete { id: i64 },
    /// Remove stored photos that no sighting references
    Prune,
}

struct App {
    paths: AppPaths,
    settings: Settings,
    pool: DbPool,
    store: Arc<DraftStore<FileDraftStorage>>,
    progress: ProgressStore<FileDraftStorage>,
    media: Arc<dyn MediaStorage>,
}

impl App {
    fn open() -> Result<Self> {
        let paths = AppPaths::discover()?;
        let settings = Settings::load(&paths)?;
        let pool = db::init_database(&paths.db_path)?;
        let store = Arc::new(DraftStore::new(FileDraftStorage::new(paths.draft_path.clone())));
        let progress = ProgressStore::new(FileDraftStorage::new(paths.progress_path.clone()));
        let media: Arc<dyn MediaStorage> = Arc::new(LocalStorage::new(
            paths.media_dir.clone(),
            &settings.public_media_url,
        )?);
        Ok(Self {
            paths,
            settings,
            pool,
            store,
            progress,
            media,
        })
    }

    /// Picks up the saved step cursor, or derives one from the draft when none was saved.
    fn controller(&self, draft: &SightingDraft) -> Result<StepController> {
        match self.progress.load()? {
            Some(saved) => {
                StepController::restore(default_steps(), ValidationSchema::default(), &saved, draft)
            }
            None => StepController::resume(default_steps(), ValidationSchema::default(), draft),
        }
    }

    fn save_controller(&self, controller: &StepController) -> Result<()> {
        self.progress.save(&controller.progress())
    }

    fn pipeline(&self) -> MediaPipeline<FileDraftStorage> {
        let exe = self
            .settings
            .exiftool_path
            .clone()
            .unwrap_or_else(|| self.paths.resolve_bin("exiftool"));
        MediaPipeline::new(Arc::new(ExifTool::new(exe)), self.store.clone())
    }

    fn backend(&self) -> Result<Arc<dyn SightingBackend>> {
        Ok(match self.settings.backend {
            BackendMode::Local => Arc::new(LocalBackend::new(self.pool.clone())),
            BackendMode::Remote => Arc::new(HttpBackend::new(&self.settings.api_base_url)?),
        })
    }

    fn admin(&self) -> AdminService {
        AdminService::new(self.pool.clone(), self.media.clone(), &self.settings.admin_role)
    }

    fn user(&self, claims: &Path) -> Result<AuthUser> {
        let raw = std::fs::read(claims)?;
        let claims: serde_json::Value = serde_json::from_slice(&raw)?;
        AuthUser::from_claims(&claims, &self.settings.roles_claim)
    }
}

fn write_output(out: Option<PathBuf>, body: &str) -> Result<()> {
    match out {
        Some(path) => {
            std::fs::write(&path, body)?;
            log::info!("Wrote {}", path.display());
        }
        None => println!("{body}"),
    }
    Ok(())
}

fn print_draft(app: &App, draft: &SightingDraft) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&draft.report)?);
    for (idx, m) in draft.media.iter().enumerate() {
        let marker = if m.from_position_step { " (position)" } else { "" };
        println!("media[{idx}]: {}{marker}", m.file_name);
    }

    let controller = app.controller(draft)?;
    let current = match controller.state() {
        FlowState::Active(idx) => Some(idx),
        FlowState::Complete => {
            println!("The last report was submitted. Edit the draft to start a new one.");
            None
        }
    };
    for (idx, step) in controller.steps().iter().enumerate() {
        let cursor = if current == Some(idx) { ">" } else { " " };
        let done = if controller.is_completed(idx) { "x" } else { " " };
        let optional = if step.optional { " (optional)" } else { "" };
        println!("{cursor} [{done}] {idx} {}{optional}", step.title);
    }
    println!(
        "{} of {} steps complete",
        controller.completed().count(),
        controller.steps().len()
    );
    if let Some(step) = controller.current_step() {
        if let Err(errors) = ValidationSchema::default().validate_step(step, draft) {
            for e in errors.0 {
                println!("    {}: {}", e.field, e.reason);
            }
        }
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let app = App::open()?;

    match cli.command {
        Commands::Init => {
            if !app.paths.settings_path().exists() {
                app.settings.save(&app.paths)?;
            }
            println!("Data directory: {}", app.paths.root.display());
        }
        Commands::Draft { action } => match action {
            DraftAction::Show => print_draft(&app, &app.store.load())?,
            DraftAction::Set { json, file } => {
                let raw = match (json, file) {
                    (Some(json), _) => json,
                    (None, Some(file)) => std::fs::read_to_string(file)?,
                    (None, None) => return Err(Error::Init("Pass --json or --file".into())),
                };
                let patch: DraftPatch = serde_json::from_str(&raw)?;
                let draft = app.store.update(patch)?;
                print_draft(&app, &draft)?;
            }
            DraftAction::Attach { path, position } => {
                let file = MediaFile::from_path(&path)?;
                let pipeline = app.pipeline();
                let attachment = tokio::task::spawn_blocking(move || {
                    if position {
                        pipeline.ingest_from_position_step(file)
                    } else {
                        pipeline.ingest(file)
                    }
                })
                .await
                .map_err(|e| Error::Init(format!("Task join error: {e}")))??;
                println!("{}", serde_json::to_string_pretty(&attachment.exif)?);
            }
            DraftAction::Detach { index } => {
                let removed = app.pipeline().remove(index)?;
                println!("Removed {}", removed.file_name);
            }
            DraftAction::Next => {
                let draft = app.store.load();
                let mut controller = app.controller(&draft)?;
                let result = controller.next(&draft);
                // Keep the completion mark `next` just refreshed, even when the step blocked.
                app.save_controller(&controller)?;
                result?;
                if let Some(step) = controller.current_step() {
                    println!("{}: {}", step.title, step.description);
                }
                if controller.ready_to_submit(&draft) {
                    println!("Ready to submit.");
                }
            }
            DraftAction::Back => {
                let draft = app.store.load();
                let mut controller = app.controller(&draft)?;
                controller.back()?;
                app.save_controller(&controller)?;
                if let Some(step) = controller.current_step() {
                    println!("{}: {}", step.title, step.description);
                }
            }
            DraftAction::Goto { step } => {
                let draft = app.store.load();
                let mut controller = app.controller(&draft)?;
                controller.go_to(step)?;
                app.save_controller(&controller)?;
                if let Some(step) = controller.current_step() {
                    println!("{}: {}", step.title, step.description);
                    println!("Fields: {}", step.fields.join(", "));
                }
            }
            DraftAction::Clear => {
                app.store.clear()?;
                app.progress.clear()?;
                println!("Draft cleared");
            }
        },
        Commands::Submit => {
            let draft = app.store.load();
            let mut controller = app.controller(&draft)?;
            if !controller.ready_to_submit(&draft) {
                ValidationSchema::default()
                    .validate_full(&draft)
                    .map_err(Error::Validation)?;
            }
            let client = SubmissionClient::new(
                ValidationSchema::default(),
                app.backend()?,
                app.media.clone(),
                app.store.clone(),
            );
            let id = client.submit(&draft).await?;
            controller.mark_submitted();
            app.save_controller(&controller)?;
            println!("Thank you! Sighting {id} was received.");
        }
        Commands::Admin { claims, action } => {
            let user = app.user(&claims)?;
            let admin = app.admin();
            match action {
                AdminAction::List { unverified } => {
                    let filter = ExportFilter {
                        verified: unverified.then_some(false),
                        ..Default::default()
                    };
                    for s in admin.list(Some(&user), &filter)? {
                        println!(
                            "{:>6}  {}  {:<20}  {}",
                            s.id,
                            if s.verified { "verified  " } else { "unverified" },
                            s.report.species.as_deref().unwrap_or("-"),
                            s.report.observed_at.as_deref().unwrap_or("-")
                        );
                    }
                }
                AdminAction::Show { id } => {
                    let sighting = admin.get(Some(&user), id)?;
                    println!("{}", serde_json::to_string_pretty(&sighting)?);
                }
                AdminAction::Verify { id } => admin.set_verified(Some(&user), id, true)?,
                AdminAction::Unverify { id } => admin.set_verified(Some(&user), id, false)?,
                AdminAction::Delete { id } => admin.delete(Some(&user), id)?,
                AdminAction::Prune => {
                    // Remote mode keeps its records elsewhere; local storage cannot tell what is orphaned.
                    if app.settings.backend != BackendMode::Local {
                        return Err(Error::Init("Pruning needs the local backend".into()));
                    }
                    for key in admin.prune_media(Some(&user))? {
                        println!("Removed {key}");
                    }
                }
            }
        }
        Commands::Export {
            format,
            from,
            to,
            all,
            claims,
            out,
        } => {
            let user = claims.as_ref().map(|c| app.user(c)).transpose()?;
            let filter = ExportFilter {
                from,
                to,
                verified: if all { None } else { Some(true) },
            };
            let body = app.admin().export(user.as_ref(), &filter, format)?;
            let out = out.map(|path| {
                if path.extension().is_none() {
                    path.with_extension(format.extension())
                } else {
                    path
                }
            });
            write_output(out, &body)?;
        }
        Commands::Map { out } => {
            let feed = map::map_feed(&app.pool)?;
            write_output(out, &serde_json::to_string_pretty(&feed)?)?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        match &err {
            Error::Validation(errors) => {
                eprintln!("The report is not complete yet:");
                for e in &errors.0 {
                    eprintln!("  {}: {}", e.field, e.reason);
                }
            }
            other => eprintln!("{other}"),
        }
        std::process::exit(1);
    }
}
