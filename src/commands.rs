//! Subcommand implementations.
//!
//! Every mutating command starts a controller over the file-backed stores in
//! the state directory, submits its events, waits for the queue to settle and
//! reports each touched snippet's status.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result, bail};
use authmap::config::AuthmapConfig;
use authmap::controller::{Context, Controller, Event, NamespaceFilter, Submission};
use authmap::format::OutputFormat;
use authmap::manifest::SnippetManifest;
use authmap::snippets::{FileSnippetStore, SnippetStore};
use authmap::telemetry;
use authmap_core::model::{EntryKind, Snippet, SnippetId};
use authmap_core::store::{FileTableStore, StoreError};
use serde::Serialize;

/// Stores and settings shared by the commands.
pub struct Env {
    config: AuthmapConfig,
    table: Arc<FileTableStore>,
    snippets: Arc<FileSnippetStore>,
    timeout: Duration,
}

impl Env {
    /// Load config, set up logging and open the stores under `state_dir`.
    pub fn open(state_dir: PathBuf, config: Option<&Path>, timeout_secs: u64) -> Result<Self> {
        let config_path = config.map_or_else(|| state_dir.join("config.toml"), Path::to_path_buf);
        let config = AuthmapConfig::load(&config_path)?;
        telemetry::init(&config.log);

        fs::create_dir_all(&state_dir)
            .with_context(|| format!("creating state directory {}", state_dir.display()))?;
        let table = Arc::new(FileTableStore::new(
            state_dir.join("aws-auth.json"),
            config.table.table_ref(),
        ));
        let snippets = Arc::new(FileSnippetStore::new(state_dir.join("snippets.json")));

        Ok(Self {
            config,
            table,
            snippets,
            timeout: Duration::from_secs(timeout_secs),
        })
    }

    fn controller(&self) -> Result<Controller> {
        let ctx = Context {
            table: self.table.clone(),
            snippets: self.snippets.clone(),
            policy: self.config.table.policy(),
            max_conflict_retries: self.config.controller.max_conflict_retries,
        };
        let filter = NamespaceFilter::new(&self.config.watch.namespaces);
        Controller::start(ctx, &self.config.controller, filter).context("starting controller")
    }

    fn settle(&self, controller: Controller) -> Result<()> {
        let settled = controller.wait_idle(self.timeout);
        controller.shutdown();
        if !settled {
            bail!(
                "controller did not settle within {}s; some snippets are still being retried \
                 (run with RUST_LOG=authmap=debug for details)",
                self.timeout.as_secs()
            );
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// apply / delete / resync
// ---------------------------------------------------------------------------

/// `authmap apply <file>`
pub fn apply(env: &Env, file: &Path) -> Result<ExitCode> {
    let manifests = SnippetManifest::load_all(file)?;
    let controller = env.controller()?;
    let mut touched = Vec::new();
    for manifest in manifests {
        let event = manifest.into_event()?;
        let id = event.id().clone();
        match controller.submit(event)? {
            Submission::Queued => touched.push(id),
            Submission::Filtered => println!("{id}: skipped, namespace is not watched"),
            Submission::ShutDown => bail!("controller stopped before {id} was queued"),
        }
    }
    env.settle(controller)?;

    let mut ok = true;
    for id in &touched {
        ok &= report(env.snippets.get(id)?.as_ref(), id);
    }
    Ok(exit(ok))
}

/// `authmap delete <ns/name>`
pub fn delete(env: &Env, id: &str) -> Result<ExitCode> {
    let id: SnippetId = id.parse()?;
    let controller = env.controller()?;
    let submission = controller.submit(Event::DeleteRequested { id: id.clone() })?;
    env.settle(controller)?;

    if submission == Submission::Filtered {
        println!("{id}: skipped, namespace is not watched");
        return Ok(ExitCode::SUCCESS);
    }
    match env.snippets.get(&id)? {
        None => {
            println!("{id}: deleted");
            Ok(ExitCode::SUCCESS)
        }
        Some(s) => {
            let reason = s.status.message.as_deref().unwrap_or("cleanup pending");
            println!("{id}: still deleting: {reason}");
            Ok(ExitCode::FAILURE)
        }
    }
}

/// `authmap resync`
pub fn resync(env: &Env) -> Result<ExitCode> {
    let controller = env.controller()?;
    let queued = controller.resync_all()?;
    env.settle(controller)?;
    println!("checked {queued} snippet(s)");

    let mut ok = true;
    for snippet in env.snippets.list()? {
        ok &= report(Some(&snippet), &snippet.id);
    }
    Ok(exit(ok))
}

fn report(snippet: Option<&Snippet>, id: &SnippetId) -> bool {
    match snippet {
        None => {
            println!("{id}: gone");
            true
        }
        Some(s) if s.status.is_synced => {
            println!(
                "{id}: synced at generation {} ({} role(s), {} user(s))",
                s.status.observed_generation,
                s.status.role_arns.len(),
                s.status.user_arns.len()
            );
            true
        }
        Some(s) => {
            let reason = s.status.message.as_deref().unwrap_or("not yet merged");
            println!("{id}: NOT synced: {reason}");
            false
        }
    }
}

const fn exit(ok: bool) -> ExitCode {
    if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE }
}

// ---------------------------------------------------------------------------
// show / status
// ---------------------------------------------------------------------------

/// `authmap show`
pub fn show(env: &Env, format: OutputFormat) -> Result<ExitCode> {
    let document = match env.table.document() {
        Ok(doc) => doc,
        Err(StoreError::NotFound { resource }) => {
            println!("{resource} has not been created yet");
            return Ok(ExitCode::SUCCESS);
        }
        Err(e) => return Err(e.into()),
    };
    match format {
        OutputFormat::Json => println!("{}", format.serialize(&document)?),
        OutputFormat::Text => {
            let table = document.decode()?;
            println!("{} (generation {})", document.resource(), table.generation);
            for kind in EntryKind::ALL {
                for entry in table.entries(kind).values() {
                    println!(
                        "  {kind:<4}  {:<50}  {:<24}  {}",
                        entry.principal_arn,
                        entry.rbac_name,
                        entry.groups.join(",")
                    );
                }
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

#[derive(Serialize)]
struct StatusRow<'a> {
    id: &'a SnippetId,
    phase: String,
    #[serde(flatten)]
    status: &'a authmap_core::model::SnippetStatus,
}

/// `authmap status`
pub fn status(env: &Env, format: OutputFormat) -> Result<ExitCode> {
    let snippets = env.snippets.list()?;
    match format {
        OutputFormat::Json => {
            let rows: Vec<StatusRow<'_>> = snippets
                .iter()
                .map(|s| StatusRow {
                    id: &s.id,
                    phase: s.phase.to_string(),
                    status: &s.status,
                })
                .collect();
            println!("{}", format.serialize(&rows)?);
        }
        OutputFormat::Text => {
            if snippets.is_empty() {
                println!("no snippets");
            }
            for s in &snippets {
                let state = if s.status.is_synced { "synced" } else { "unsynced" };
                println!(
                    "{:<40}  {:<8}  {:<8}  gen {:<6}  roles {:<3}  users {:<3}  {}",
                    s.id.to_string(),
                    s.phase.to_string(),
                    state,
                    s.status.observed_generation.to_string(),
                    s.status.role_arns.len(),
                    s.status.user_arns.len(),
                    s.status.message.as_deref().unwrap_or("")
                );
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}
