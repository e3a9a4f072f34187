use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing_subscriber::EnvFilter;

use mnemo_bundle::{BundleRequest, build_bundle, emit_repair_tasks, resolve_pointer};
use mnemo_config::{DataRoot, MsConfig};
use mnemo_index::{
    SearchQuery, get_view, index_mu_dir, invalidate_by_mu_ids, put_view, search_mu,
};
use mnemo_jobs::{
    CommandMuPacker, JobsWorker, import_job, list_jobs, retry_job, scan_inbox_gc,
};
use mnemo_membership::{
    MembershipEventKind, append_membership_events, canonicalize_mu_ids, iter_mu_ids_from_dir,
    load_effective_membership,
};
use mnemo_pipeline::{
    RepairPipelineOptions, SyncPipelineOptions, run_bundle_repair_pipeline,
    run_manifest_sync_pipeline,
};
use mnemo_sync::report::ManifestKind;
use mnemo_sync::{analyze_sync, apply_plan, plan_patch, replay_manifest_task};
use mnemo_tasks::query_tasks;
use mnemo_vault::{Pointer, VaultRoots, ingest_mu_tree, ingest_raw_tree, verify_manifest};

const EXIT_OK: i32 = 0;
const EXIT_INVALID: i32 = 2;

#[derive(Debug, Parser)]
#[command(name = "mnemo", version, about = "Local-first personal memory store")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Ingest raw files into a vault (content-addressed, append-only manifest).
    Ingest {
        #[arg(long = "in")]
        input: PathBuf,
        #[arg(long)]
        vault_root: PathBuf,
        #[arg(long, default_value = "default")]
        vault_id: String,
        #[arg(long)]
        manifest: Option<PathBuf>,
    },
    /// Ingest MU (.mimo) files into a vault.
    IngestMu {
        #[arg(long = "in")]
        input: PathBuf,
        #[arg(long)]
        vault_root: PathBuf,
        #[arg(long, default_value = "default")]
        vault_id: String,
        #[arg(long)]
        manifest: Option<PathBuf>,
    },
    /// Rebuild the MU index from a .mimo tree.
    Index {
        #[arg(long)]
        mu_root: PathBuf,
        #[arg(long)]
        db: PathBuf,
        #[arg(long)]
        reset: bool,
    },
    /// Search MU within a workspace (membership fence + canonicalization).
    Search {
        #[arg(long)]
        db: PathBuf,
        #[arg(long)]
        data_root: Option<PathBuf>,
        #[arg(long)]
        workspace: String,
        #[arg(long)]
        query: Option<String>,
        #[arg(long)]
        since: Option<String>,
        #[arg(long)]
        until: Option<String>,
        #[arg(long)]
        tag: Option<String>,
        #[arg(long)]
        privacy: Option<String>,
        #[arg(long, default_value = "private")]
        target_level: String,
        #[arg(long)]
        snippets: bool,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Build a bundle and write it as JSON.
    Bundle {
        #[arg(long)]
        db: PathBuf,
        #[arg(long)]
        data_root: Option<PathBuf>,
        #[arg(long)]
        workspace: String,
        #[arg(long)]
        query: String,
        #[arg(long, default_value_t = 7)]
        days: u32,
        #[arg(long, default_value = "time_overview_v1")]
        template: String,
        #[arg(long, default_value = "private")]
        target_level: String,
        #[arg(long, default_value = "mu_ids")]
        evidence_depth: String,
        #[arg(long, default_value_t = 50)]
        limit: usize,
        #[arg(long)]
        template_name: Option<String>,
        #[arg(long)]
        templates_dir: Option<PathBuf>,
        /// Vault root mapping like default=/data/vaults/default (repeatable).
        #[arg(long = "vault-root")]
        vault_roots: Vec<String>,
        #[arg(long)]
        raw_manifest: Option<PathBuf>,
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        out: PathBuf,
    },
    /// Workspace membership operations.
    Membership {
        #[command(subcommand)]
        command: MembershipCommands,
    },
    /// Manifest sync: report, plan, or full pipeline run.
    Sync {
        #[command(subcommand)]
        command: SyncCommands,
    },
    /// Resolve one pointer (JSON) to verified bytes and a snippet.
    ResolvePointer {
        #[arg(long)]
        pointer_json: String,
        #[arg(long = "vault-root")]
        vault_roots: Vec<String>,
        #[arg(long)]
        raw_manifest: Option<PathBuf>,
    },
    /// Pointer repair: emit tasks from a bundle, or run the full pipeline.
    Repair {
        #[command(subcommand)]
        command: RepairCommands,
    },
    /// Task journal queries and replay.
    Journal {
        #[command(subcommand)]
        command: JournalCommands,
    },
    /// View cache operations.
    View {
        #[command(subcommand)]
        command: ViewCommands,
    },
    /// Verify manifest sha256s against vault contents.
    Verify {
        #[arg(long)]
        manifest: PathBuf,
        #[arg(long = "vault-root")]
        vault_roots: Vec<String>,
    },
    /// File-queue jobs: import, worker, list, retry, gc.
    Jobs {
        #[command(subcommand)]
        command: JobsCommands,
    },
    /// Show the resolved runtime config.
    Config {
        #[arg(long)]
        config: PathBuf,
    },
}

#[derive(Debug, Subcommand)]
enum MembershipCommands {
    /// Append add events for every .mimo under --mu-dir.
    Assign {
        #[arg(long)]
        data_root: PathBuf,
        #[arg(long)]
        workspace: String,
        #[arg(long)]
        mu_dir: PathBuf,
        #[arg(long)]
        source: String,
    },
    /// Append remove events for the given mu ids.
    Remove {
        #[arg(long)]
        data_root: PathBuf,
        #[arg(long)]
        workspace: String,
        #[arg(long = "mu-id", required = true)]
        mu_ids: Vec<String>,
        #[arg(long)]
        source: String,
    },
    /// Print the effective (and canonicalized) membership set.
    Show {
        #[arg(long)]
        data_root: PathBuf,
        #[arg(long)]
        workspace: String,
        #[arg(long)]
        db: Option<PathBuf>,
    },
}

#[derive(Debug, Subcommand)]
enum SyncCommands {
    Report {
        #[arg(long)]
        kind: String,
        #[arg(long)]
        base: PathBuf,
        #[arg(long)]
        incoming: PathBuf,
        #[arg(long)]
        out: PathBuf,
    },
    Plan {
        #[arg(long)]
        kind: String,
        #[arg(long)]
        base: PathBuf,
        #[arg(long)]
        incoming: PathBuf,
        #[arg(long)]
        out: PathBuf,
        /// Actually append safe new records to the base manifest.
        #[arg(long)]
        apply: bool,
    },
    Run {
        #[arg(long)]
        kind: String,
        #[arg(long)]
        base: PathBuf,
        #[arg(long)]
        incoming: PathBuf,
        #[arg(long = "vault-root")]
        vault_roots: Vec<String>,
        #[arg(long)]
        runs_root: Option<PathBuf>,
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        apply: bool,
    },
}

#[derive(Debug, Subcommand)]
enum RepairCommands {
    /// Emit REPAIR_POINTER task specs from a bundle's diagnostics.
    Emit {
        #[arg(long)]
        bundle: PathBuf,
        #[arg(long)]
        out_dir: PathBuf,
    },
    /// Full bundle repair pipeline into a run dir.
    Run {
        #[arg(long)]
        db: PathBuf,
        #[arg(long)]
        data_root: Option<PathBuf>,
        #[arg(long)]
        workspace: String,
        #[arg(long)]
        query: String,
        #[arg(long, default_value_t = 7)]
        days: u32,
        #[arg(long, default_value = "time_overview_v1")]
        template: String,
        #[arg(long, default_value = "private")]
        target_level: String,
        #[arg(long = "vault-root")]
        vault_roots: Vec<String>,
        #[arg(long)]
        raw_manifest: Option<PathBuf>,
        #[arg(long)]
        runs_root: Option<PathBuf>,
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        index_db: Option<PathBuf>,
        #[arg(long)]
        index_reset: bool,
    },
}

#[derive(Debug, Subcommand)]
enum JournalCommands {
    Query {
        #[arg(long)]
        db: PathBuf,
        #[arg(long = "type")]
        task_type: Option<String>,
        #[arg(long)]
        status: Option<String>,
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    Replay {
        #[arg(long)]
        db: PathBuf,
        #[arg(long)]
        task_id: String,
    },
}

#[derive(Debug, Subcommand)]
enum ViewCommands {
    Put {
        #[arg(long)]
        db: PathBuf,
        #[arg(long)]
        view_id: String,
        #[arg(long)]
        template: String,
        /// Scope as JSON.
        #[arg(long)]
        scope: String,
        /// Dependency mu_ids as a JSON array.
        #[arg(long)]
        source_mu_ids: String,
        /// Content as JSON.
        #[arg(long)]
        content: String,
    },
    Get {
        #[arg(long)]
        db: PathBuf,
        #[arg(long)]
        view_id: String,
    },
    Invalidate {
        #[arg(long)]
        db: PathBuf,
        /// Changed mu_ids as a JSON array.
        #[arg(long)]
        changed: String,
    },
}

#[derive(Debug, Subcommand)]
enum JobsCommands {
    Import {
        #[arg(long)]
        data_root: PathBuf,
        #[arg(long)]
        workspace: String,
        #[arg(long = "in")]
        input: PathBuf,
        #[arg(long, default_value = "line_window:200")]
        split: String,
        #[arg(long, default_value = "file")]
        source_kind: String,
        #[arg(long, default_value = "default")]
        vault_id: String,
        #[arg(long)]
        job_id: Option<String>,
    },
    Worker {
        #[arg(long)]
        data_root: PathBuf,
        #[arg(long)]
        once: bool,
        #[arg(long = "loop")]
        run_loop: bool,
        #[arg(long, default_value_t = 2.0)]
        poll_seconds: f64,
        /// MU packer program invoked as a subprocess.
        #[arg(long, default_value = "mimo-pack")]
        packer: String,
    },
    List {
        #[arg(long)]
        data_root: PathBuf,
    },
    Retry {
        #[arg(long)]
        data_root: PathBuf,
        #[arg(long)]
        job_id: String,
        #[arg(long)]
        new_job_id: Option<String>,
    },
    Gc {
        #[arg(long)]
        data_root: PathBuf,
        #[arg(long, default_value_t = 30)]
        days: u32,
        #[arg(long)]
        dry_run: bool,
    },
}

fn parse_vault_roots(items: &[String]) -> Result<VaultRoots> {
    let mut roots = VaultRoots::new();
    for item in items {
        let Some((vault_id, root)) = item.split_once('=') else {
            bail!("invalid --vault-root {item:?} (expected vault_id=path)");
        };
        roots.insert(vault_id.to_string(), root.to_string());
    }
    Ok(roots)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn write_json_out(path: &Path, value: &serde_json::Value) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, format!("{}\n", serde_json::to_string_pretty(value)?))?;
    Ok(())
}

fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Commands::Ingest {
            input,
            vault_root,
            vault_id,
            manifest,
        } => {
            let batch = ingest_raw_tree(&input, &vault_root, &vault_id, manifest.as_deref())?;
            println!("ingested_files={}", batch.ingested.len());
            if !batch.errors.is_empty() {
                for (path, err) in &batch.errors {
                    eprintln!("failed: {}: {err}", path.display());
                }
                return Ok(EXIT_INVALID);
            }
            Ok(EXIT_OK)
        }
        Commands::IngestMu {
            input,
            vault_root,
            vault_id,
            manifest,
        } => {
            let batch = ingest_mu_tree(&input, &vault_root, &vault_id, manifest.as_deref())?;
            println!("ingested_mu_files={}", batch.ingested.len());
            if !batch.errors.is_empty() {
                for (path, err) in &batch.errors {
                    eprintln!("failed: {}: {err}", path.display());
                }
                return Ok(EXIT_INVALID);
            }
            Ok(EXIT_OK)
        }
        Commands::Index { mu_root, db, reset } => {
            let summary = index_mu_dir(&mu_root, &db, reset)?;
            print_json(&json!({"indexed": summary.indexed}))?;
            Ok(EXIT_OK)
        }
        Commands::Search {
            db,
            data_root,
            workspace,
            query,
            since,
            until,
            tag,
            privacy,
            target_level,
            snippets,
            limit,
        } => {
            let data_root = match data_root {
                Some(root) => root,
                None => DataRoot::infer_from_index_db(&db)?.path().to_path_buf(),
            };
            let (effective, membership_diag) =
                load_effective_membership(&data_root, &workspace)?;
            let (canonical, canonical_diag) = canonicalize_mu_ids(&db, &effective)?;

            let hits = search_mu(
                &db,
                &SearchQuery {
                    query: query.clone(),
                    since: since.clone(),
                    until: until.clone(),
                    tag: tag.clone(),
                    privacy: privacy.clone(),
                    target_level,
                    include_snippet: snippets,
                    limit,
                    allow_mu_ids: Some(canonical.clone()),
                },
            )?;
            print_json(&json!({
                "db": db.display().to_string(),
                "data_root": data_root.display().to_string(),
                "workspace": workspace,
                "membership": {
                    "effective": membership_diag,
                    "canonicalized_count": canonical.len(),
                    "canonicalization": canonical_diag,
                },
                "query": query,
                "filters": {"since": since, "until": until, "tag": tag, "privacy": privacy},
                "results": hits,
            }))?;
            Ok(EXIT_OK)
        }
        Commands::Bundle {
            db,
            data_root,
            workspace,
            query,
            days,
            template,
            target_level,
            evidence_depth,
            limit,
            template_name,
            templates_dir,
            vault_roots,
            raw_manifest,
            config,
            out,
        } => {
            let mut request = BundleRequest::new(&db, &workspace, &query);
            request.data_root = data_root;
            request.days = days;
            request.template = template;
            request.target_level = target_level;
            request.evidence_depth = evidence_depth;
            request.limit = limit;
            request.template_name = template_name;
            request.templates_dir = templates_dir;

            if let Some(config_path) = config {
                let config = MsConfig::load_from(&config_path)?;
                request.vault_roots = Some(config.vault_roots.clone());
                request.raw_manifest_path = config.raw_manifest_path.map(PathBuf::from);
            }
            // explicit flags override config
            if !vault_roots.is_empty() {
                request.vault_roots = Some(parse_vault_roots(&vault_roots)?);
            }
            if let Some(raw_manifest) = raw_manifest {
                request.raw_manifest_path = Some(raw_manifest);
            }

            let bundle = build_bundle(&request)?;
            write_json_out(&out, &serde_json::to_value(&bundle)?)?;
            println!("{}", out.display());
            Ok(EXIT_OK)
        }
        Commands::Membership { command } => match command {
            MembershipCommands::Assign {
                data_root,
                workspace,
                mu_dir,
                source,
            } => {
                if !mu_dir.exists() {
                    bail!("missing --mu-dir: {}", mu_dir.display());
                }
                let mu_ids = iter_mu_ids_from_dir(&mu_dir);
                let result = append_membership_events(
                    &data_root,
                    &workspace,
                    &mu_ids,
                    &source,
                    MembershipEventKind::Add,
                )?;
                print_json(&result)?;
                Ok(EXIT_OK)
            }
            MembershipCommands::Remove {
                data_root,
                workspace,
                mu_ids,
                source,
            } => {
                let result = append_membership_events(
                    &data_root,
                    &workspace,
                    &mu_ids,
                    &source,
                    MembershipEventKind::Remove,
                )?;
                print_json(&result)?;
                Ok(EXIT_OK)
            }
            MembershipCommands::Show {
                data_root,
                workspace,
                db,
            } => {
                let (effective, diag) = load_effective_membership(&data_root, &workspace)?;
                let canonical = match &db {
                    Some(db) => {
                        let (canonical, canonical_diag) = canonicalize_mu_ids(db, &effective)?;
                        Some(json!({
                            "set": canonical.iter().collect::<Vec<_>>(),
                            "diagnostics": canonical_diag,
                        }))
                    }
                    None => None,
                };
                print_json(&json!({
                    "effective": effective.iter().collect::<Vec<_>>(),
                    "diagnostics": diag,
                    "canonical": canonical,
                }))?;
                Ok(EXIT_OK)
            }
        },
        Commands::Sync { command } => match command {
            SyncCommands::Report {
                kind,
                base,
                incoming,
                out,
            } => {
                let kind: ManifestKind = kind.parse()?;
                let report = analyze_sync(kind, &base, &incoming)?;
                write_json_out(&out, &serde_json::to_value(&report)?)?;
                println!("{}", out.display());
                Ok(EXIT_OK)
            }
            SyncCommands::Plan {
                kind,
                base,
                incoming,
                out,
                apply,
            } => {
                let kind: ManifestKind = kind.parse()?;
                let mut plan = plan_patch(kind, &base, &incoming)?;
                plan.dry_run = !apply;
                write_json_out(&out, &serde_json::to_value(&plan)?)?;
                if apply {
                    apply_plan(&plan)?;
                }
                println!("{}", out.display());
                Ok(EXIT_OK)
            }
            SyncCommands::Run {
                kind,
                base,
                incoming,
                vault_roots,
                runs_root,
                config,
                apply,
            } => {
                let kind: ManifestKind = kind.parse()?;
                let mut roots = parse_vault_roots(&vault_roots)?;
                let mut runs_root = runs_root;
                if let Some(config_path) = config {
                    let config = MsConfig::load_from(&config_path)?;
                    for (vault_id, root) in &config.vault_roots {
                        roots.entry(vault_id.clone()).or_insert_with(|| root.clone());
                    }
                    if runs_root.is_none() {
                        runs_root = config.runs_root_sync.map(PathBuf::from);
                    }
                }
                let runs_root = runs_root
                    .context("missing runs root: pass --runs-root or a config with runs_root_sync")?;
                let run = run_manifest_sync_pipeline(&SyncPipelineOptions {
                    kind,
                    base_path: base,
                    incoming_path: incoming,
                    vault_roots: roots,
                    runs_root,
                    apply,
                })?;
                println!("{}", run.run_dir.display());
                Ok(EXIT_OK)
            }
        },
        Commands::ResolvePointer {
            pointer_json,
            vault_roots,
            raw_manifest,
        } => {
            let pointer: Pointer =
                serde_json::from_str(&pointer_json).context("parsing --pointer-json")?;
            let roots = parse_vault_roots(&vault_roots)?;
            let outcome = resolve_pointer(&pointer, &roots, raw_manifest.as_deref());
            print_json(&outcome)?;
            Ok(if outcome.ok { EXIT_OK } else { EXIT_INVALID })
        }
        Commands::Repair { command } => match command {
            RepairCommands::Emit { bundle, out_dir } => {
                let summary = emit_repair_tasks(&bundle, &out_dir)?;
                print_json(&json!({
                    "wrote": summary.wrote,
                    "out_dir": summary.out_dir.display().to_string(),
                }))?;
                Ok(EXIT_OK)
            }
            RepairCommands::Run {
                db,
                data_root,
                workspace,
                query,
                days,
                template,
                target_level,
                vault_roots,
                raw_manifest,
                runs_root,
                config,
                index_db,
                index_reset,
            } => {
                let mut roots = parse_vault_roots(&vault_roots)?;
                let mut raw_manifest = raw_manifest;
                let mut runs_root = runs_root;
                if let Some(config_path) = config {
                    let config = MsConfig::load_from(&config_path)?;
                    for (vault_id, root) in &config.vault_roots {
                        roots.entry(vault_id.clone()).or_insert_with(|| root.clone());
                    }
                    if raw_manifest.is_none() {
                        raw_manifest = config.raw_manifest_path.map(PathBuf::from);
                    }
                    if runs_root.is_none() {
                        runs_root = config.runs_root_repair.map(PathBuf::from);
                    }
                }
                let runs_root = runs_root.context(
                    "missing runs root: pass --runs-root or a config with runs_root_repair",
                )?;
                let run = run_bundle_repair_pipeline(&RepairPipelineOptions {
                    db_path: db,
                    data_root,
                    workspace,
                    query,
                    days,
                    template,
                    target_level,
                    vault_roots: roots,
                    raw_manifest_path: raw_manifest,
                    runs_root,
                    index_db,
                    index_reset,
                })?;
                println!("{}", run.run_dir.display());
                Ok(EXIT_OK)
            }
        },
        Commands::Journal { command } => match command {
            JournalCommands::Query {
                db,
                task_type,
                status,
                limit,
            } => {
                let rows = query_tasks(&db, task_type.as_deref(), status.as_deref(), limit)?;
                print_json(&rows)?;
                Ok(EXIT_OK)
            }
            JournalCommands::Replay { db, task_id } => {
                let result = replay_manifest_task(&db, &task_id)?;
                print_json(&result)?;
                Ok(EXIT_OK)
            }
        },
        Commands::View { command } => match command {
            ViewCommands::Put {
                db,
                view_id,
                template,
                scope,
                source_mu_ids,
                content,
            } => {
                let scope: serde_json::Value = serde_json::from_str(&scope)?;
                let source_mu_ids: Vec<String> = serde_json::from_str(&source_mu_ids)?;
                let content: serde_json::Value = serde_json::from_str(&content)?;
                put_view(&db, &view_id, &template, &scope, &source_mu_ids, &content, None)?;
                println!("OK");
                Ok(EXIT_OK)
            }
            ViewCommands::Get { db, view_id } => match get_view(&db, &view_id)? {
                Some(view) => {
                    print_json(&view)?;
                    Ok(EXIT_OK)
                }
                None => {
                    println!("NOT_FOUND");
                    Ok(EXIT_INVALID)
                }
            },
            ViewCommands::Invalidate { db, changed } => {
                let changed: Vec<String> = serde_json::from_str(&changed)?;
                let count = invalidate_by_mu_ids(&db, &changed)?;
                print_json(&json!({"invalidated": count}))?;
                Ok(EXIT_OK)
            }
        },
        Commands::Verify {
            manifest,
            vault_roots,
        } => {
            let roots = parse_vault_roots(&vault_roots)?;
            let issues = verify_manifest(&manifest, &roots)?;
            if issues.is_empty() {
                println!("OK");
                return Ok(EXIT_OK);
            }
            for issue in &issues {
                eprintln!("{}", issue.message);
            }
            Ok(EXIT_INVALID)
        }
        Commands::Jobs { command } => match command {
            JobsCommands::Import {
                data_root,
                workspace,
                input,
                split,
                source_kind,
                vault_id,
                job_id,
            } => {
                let result = import_job(
                    &data_root,
                    &workspace,
                    &input,
                    &split,
                    &source_kind,
                    &vault_id,
                    job_id.as_deref(),
                )?;
                print_json(&result)?;
                Ok(EXIT_OK)
            }
            JobsCommands::Worker {
                data_root,
                once,
                run_loop,
                poll_seconds,
                packer,
            } => {
                if once == run_loop {
                    bail!("pass exactly one of --once or --loop");
                }
                let packer = CommandMuPacker {
                    program: packer,
                    extra_args: Vec::new(),
                };
                let worker = JobsWorker::new(&data_root, &packer);
                if once {
                    worker.tick();
                    return Ok(EXIT_OK);
                }
                worker.run_loop(poll_seconds);
                Ok(EXIT_OK)
            }
            JobsCommands::List { data_root } => {
                let listings = list_jobs(&data_root)?;
                print_json(&listings)?;
                Ok(EXIT_OK)
            }
            JobsCommands::Retry {
                data_root,
                job_id,
                new_job_id,
            } => {
                let result = retry_job(&data_root, &job_id, new_job_id.as_deref())?;
                print_json(&result)?;
                Ok(EXIT_OK)
            }
            JobsCommands::Gc {
                data_root,
                days,
                dry_run,
            } => {
                if !dry_run {
                    bail!("only --dry-run is supported (safety)");
                }
                let report = scan_inbox_gc(&data_root, days)?;
                print_json(&report)?;
                Ok(EXIT_OK)
            }
        },
        Commands::Config { config } => {
            let config = MsConfig::load_from(&config)?;
            print_json(&config)?;
            Ok(EXIT_OK)
        }
    }
}

fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            EXIT_INVALID
        }
    };
    std::process::exit(code);
}

#[cfg(test)]
mod tests {
    use super::parse_vault_roots;

    #[test]
    fn vault_root_mappings_parse_and_reject_bad_shapes() {
        let roots = parse_vault_roots(&[
            "default=/data/vaults/default".to_string(),
            "replica=/mnt/r".to_string(),
        ])
        .unwrap();
        assert_eq!(
            roots.get("default").map(String::as_str),
            Some("/data/vaults/default")
        );
        assert_eq!(roots.len(), 2);

        assert!(parse_vault_roots(&["no-equals-sign".to_string()]).is_err());
    }
}
