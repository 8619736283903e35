//! snapm CLI - Manage snapshot sets

use clap::{ArgAction, Args, Parser, Subcommand};
use colored::Colorize;
use snapm::command::{
    self, snapset_fields, snapshot_fields, VERBOSE_SNAPSET_FIELDS, VERBOSE_SNAPSHOT_FIELDS,
};
use snapm::config::Config;
use snapm::logging::{default_level, init_logging, DebugOptions};
use snapm::report::{self, ReportOpts};
use snapm::{Error, Manager, MountSpec, MountTable, Outcome, Result, Selection};
use std::path::PathBuf;
use std::process::ExitCode;
use std::rc::Rc;

#[derive(Parser)]
#[command(name = "snapm")]
#[command(about = "Manage snapshot sets", long_about = None)]
#[command(version)]
struct Cli {
    /// Enable debugging output: manager, command, plugins, report or all
    #[arg(short, long, global = true, value_name = "SUBSYSTEMS")]
    debug: Option<String>,

    /// Increase verbosity (repeat for more)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Configuration file to use
    #[arg(short, long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage snapshot sets
    Snapset {
        #[command(subcommand)]
        command: SnapsetCommands,
    },

    /// Manage individual snapshots
    Snapshot {
        #[command(subcommand)]
        command: SnapshotCommands,
    },
}

#[derive(Subcommand)]
enum SnapsetCommands {
    /// Create a snapshot set
    Create {
        /// Name for the new snapshot set
        name: String,
        /// Mount points to snapshot, each with an optional size policy
        #[arg(required = true, value_name = "MOUNT[:POLICY]")]
        mount_points: Vec<String>,
        /// Create a boot entry for the snapshot set
        #[arg(short, long)]
        bootable: bool,
        /// Create a rollback boot entry for the snapshot set
        #[arg(short, long)]
        rollback: bool,
    },

    /// Delete a snapshot set
    Delete(SetId),

    /// Rename a snapshot set
    Rename {
        /// Current name of the snapshot set
        old_name: String,
        /// New name for the snapshot set
        new_name: String,
    },

    /// Roll back a snapshot set
    Rollback(SetId),

    /// Activate snapshot sets
    Activate(SetId),

    /// Deactivate snapshot sets
    Deactivate(SetId),

    /// Set autoactivation for snapshot sets
    Autoactivate {
        #[command(flatten)]
        id: SetId,
        #[command(flatten)]
        switch: AutoSwitch,
    },

    /// List snapshot sets
    List {
        #[command(flatten)]
        id: SetId,
        #[command(flatten)]
        report: ReportArgs,
    },

    /// Show snapshot sets
    Show {
        #[command(flatten)]
        id: SetId,
        /// Show the snapshots in each set
        #[arg(short, long)]
        members: bool,
    },
}

#[derive(Subcommand)]
enum SnapshotCommands {
    /// Activate snapshots
    Activate(SnapshotId),

    /// Deactivate snapshots
    Deactivate(SnapshotId),

    /// Set autoactivation for snapshots
    Autoactivate {
        #[command(flatten)]
        id: SnapshotId,
        #[command(flatten)]
        switch: AutoSwitch,
    },

    /// List snapshots
    List {
        #[command(flatten)]
        id: SnapshotId,
        #[command(flatten)]
        report: ReportArgs,
    },

    /// Show snapshots
    Show(SnapshotId),
}

#[derive(Args)]
struct SetId {
    /// Snapshot set name or UUID
    #[arg(value_name = "ID")]
    identifier: Option<String>,
    /// Snapshot set name
    #[arg(short, long)]
    name: Option<String>,
    /// Snapshot set UUID
    #[arg(short, long)]
    uuid: Option<String>,
}

#[derive(Args)]
struct SnapshotId {
    #[command(flatten)]
    set: SetId,
    /// Snapshot name
    #[arg(short = 'N', long)]
    snapshot_name: Option<String>,
    /// Snapshot UUID
    #[arg(short = 'U', long)]
    snapshot_uuid: Option<String>,
}

#[derive(Args)]
struct AutoSwitch {
    /// Enable autoactivation
    #[arg(long, conflicts_with = "no", required_unless_present = "no")]
    yes: bool,
    /// Disable autoactivation
    #[arg(long)]
    no: bool,
}

#[derive(Args)]
struct ReportArgs {
    /// Fields to display ('help' lists them, '+' adds to the defaults)
    #[arg(short = 'o', long = "options", value_name = "FIELDS")]
    fields: Option<String>,
    /// Fields to sort by ('-' prefix for descending)
    #[arg(short = 'O', long, value_name = "FIELDS")]
    sort: Option<String>,
    /// Print each field as a row
    #[arg(long)]
    rows: bool,
    /// Field separator
    #[arg(long, value_name = "SEP")]
    separator: Option<String>,
    /// Print NAME="value" pairs
    #[arg(long)]
    name_prefixes: bool,
    /// Omit the heading line
    #[arg(long)]
    no_headings: bool,
}

impl ReportArgs {
    fn opts(&self) -> ReportOpts {
        let mut opts = ReportOpts {
            headings: !self.no_headings,
            columns_as_rows: self.rows,
            ..ReportOpts::default()
        };
        if let Some(separator) = &self.separator {
            opts.separator = separator.clone();
            opts.aligned = false;
        }
        if self.name_prefixes {
            opts.field_name_prefix = Some("SNAPM_".to_string());
            opts.headings = false;
        }
        opts
    }

    /// Field list for the report, falling back to the verbose defaults
    fn fields(&self, verbose: u8, verbose_fields: &'static str) -> Option<String> {
        match &self.fields {
            Some(fields) => Some(fields.clone()),
            None if verbose > 0 => Some(verbose_fields.to_string()),
            None => None,
        }
    }
}

fn info(msg: &str) {
    println!("{} {}", "[INFO]".blue(), msg);
}

fn success(msg: &str) {
    println!("{} {}", "[OK]".green(), msg);
}

fn warn(msg: &str) {
    println!("{} {}", "[WARN]".yellow(), msg);
}

fn error(msg: &str) {
    eprintln!("{} {}", "[ERROR]".red(), msg);
}

fn set_selection(id: &SetId) -> Result<Selection> {
    let mut selection = match &id.identifier {
        Some(identifier) => Selection::from_identifier(identifier),
        None => Selection::new(),
    };
    if let Some(name) = &id.name {
        selection.name = Some(name.clone());
    }
    if let Some(uuid) = &id.uuid {
        selection.uuid = Some(Selection::parse_uuid(uuid)?);
    }
    Ok(selection)
}

fn snapshot_selection(id: &SnapshotId) -> Result<Selection> {
    let mut selection = set_selection(&id.set)?;
    if let Some(name) = &id.snapshot_name {
        selection.snapshot_name = Some(name.clone());
    }
    if let Some(uuid) = &id.snapshot_uuid {
        selection.snapshot_uuid = Some(Selection::parse_uuid(uuid)?);
    }
    Ok(selection)
}

/// Print member failures and fail if there were any
fn check_outcome(outcome: Outcome, what: &str) -> Result<()> {
    if outcome.is_complete() {
        success(&format!("{} {}", what, outcome.affected));
        return Ok(());
    }
    let failed = outcome.errors.len();
    for e in &outcome.errors {
        error(&e.to_string());
    }
    Err(Error::Snapm(format!(
        "{} failed for {} of {}",
        what,
        failed,
        failed + outcome.affected
    )))
}

fn build_manager(config: &Config) -> Result<Manager> {
    let mounts: Rc<dyn MountTable> = Rc::new(config.mount_table());
    let providers = config.providers(mounts.clone())?;
    let mut manager = Manager::new(providers, Rc::new(config.boot_store()), mounts);
    manager.discover_snapshot_sets()?;
    Ok(manager)
}

fn cmd_snapset_create(
    manager: &mut Manager,
    name: &str,
    mount_points: &[String],
    bootable: bool,
    rollback: bool,
) -> Result<()> {
    let specs = mount_points
        .iter()
        .map(|mp| mp.parse::<MountSpec>())
        .collect::<Result<Vec<_>>>()?;

    info(&format!("Creating snapshot set '{}'...", name));
    let snapset = command::create_snapset(manager, name, &specs, bootable, rollback)?;
    println!("{}", snapset.show()?);
    success(&format!("Snapshot set '{}' created", snapset.name()));

    Ok(())
}

fn cmd_snapset_list(
    manager: &Manager,
    id: &SetId,
    report_args: &ReportArgs,
    verbose: u8,
) -> Result<()> {
    let fields = report_args.fields(verbose, VERBOSE_SNAPSET_FIELDS);
    if fields.as_deref() == Some("help") {
        print!("{}", report::help(&snapset_fields(), "Snapshot set"));
        return Ok(());
    }
    let output = command::print_snapsets(
        manager,
        &set_selection(id)?,
        fields.as_deref(),
        &report_args.opts(),
        report_args.sort.as_deref(),
    )?;
    print!("{}", output);
    Ok(())
}

fn cmd_snapshot_list(
    manager: &Manager,
    id: &SnapshotId,
    report_args: &ReportArgs,
    verbose: u8,
) -> Result<()> {
    let fields = report_args.fields(verbose, VERBOSE_SNAPSHOT_FIELDS);
    if fields.as_deref() == Some("help") {
        print!("{}", report::help(&snapshot_fields(), "Snapshot"));
        return Ok(());
    }
    let output = command::print_snapshots(
        manager,
        &snapshot_selection(id)?,
        fields.as_deref(),
        &report_args.opts(),
        report_args.sort.as_deref(),
    )?;
    print!("{}", output);
    Ok(())
}

fn run_snapset(manager: &mut Manager, cmd: &SnapsetCommands, verbose: u8) -> Result<()> {
    match cmd {
        SnapsetCommands::Create {
            name,
            mount_points,
            bootable,
            rollback,
        } => cmd_snapset_create(manager, name, mount_points, *bootable, *rollback),
        SnapsetCommands::Delete(id) => {
            let outcome = command::delete_snapset(manager, &set_selection(id)?)?;
            check_outcome(outcome, "Deleted snapshot sets:")
        }
        SnapsetCommands::Rename { old_name, new_name } => {
            let snapset = command::rename_snapset(manager, old_name, new_name)?;
            success(&format!("Renamed '{}' to '{}'", old_name, snapset.name()));
            Ok(())
        }
        SnapsetCommands::Rollback(id) => {
            let outcome = command::rollback_snapset(manager, &set_selection(id)?)?;
            warn("Rollback takes effect when the origin volumes are next activated");
            check_outcome(outcome, "Snapshots marked for rollback:")
        }
        SnapsetCommands::Activate(id) => {
            let outcome = manager.activate_snapshot_sets(&set_selection(id)?)?;
            check_outcome(outcome, "Activated snapshots:")
        }
        SnapsetCommands::Deactivate(id) => {
            let outcome = manager.deactivate_snapshot_sets(&set_selection(id)?)?;
            check_outcome(outcome, "Deactivated snapshots:")
        }
        SnapsetCommands::Autoactivate { id, switch } => {
            let outcome = manager.set_autoactivate(&set_selection(id)?, switch.yes)?;
            check_outcome(outcome, "Set autoactivation for snapshots:")
        }
        SnapsetCommands::List { id, report } => cmd_snapset_list(manager, id, report, verbose),
        SnapsetCommands::Show { id, members } => {
            print!("{}", command::show_snapsets(manager, &set_selection(id)?, *members)?);
            Ok(())
        }
    }
}

fn run_snapshot(manager: &Manager, cmd: &SnapshotCommands, verbose: u8) -> Result<()> {
    match cmd {
        SnapshotCommands::Activate(id) => {
            let outcome = manager.activate_snapshots(&snapshot_selection(id)?)?;
            check_outcome(outcome, "Activated snapshots:")
        }
        SnapshotCommands::Deactivate(id) => {
            let outcome = manager.deactivate_snapshots(&snapshot_selection(id)?)?;
            check_outcome(outcome, "Deactivated snapshots:")
        }
        SnapshotCommands::Autoactivate { id, switch } => {
            let outcome = manager.set_snapshot_autoactivate(&snapshot_selection(id)?, switch.yes)?;
            check_outcome(outcome, "Set autoactivation for snapshots:")
        }
        SnapshotCommands::List { id, report } => cmd_snapshot_list(manager, id, report, verbose),
        SnapshotCommands::Show(id) => {
            print!("{}", command::show_snapshots(manager, &snapshot_selection(id)?)?);
            Ok(())
        }
    }
}

fn run(cli: &Cli) -> Result<()> {
    let debug: DebugOptions = cli.debug.as_deref().unwrap_or("").parse()?;
    let config = Config::load(cli.config.as_deref())?;
    init_logging(default_level(&config.log_level, cli.verbose), &debug)?;

    let mut manager = build_manager(&config)?;

    match &cli.command {
        Commands::Snapset { command } => run_snapset(&mut manager, command, cli.verbose),
        Commands::Snapshot { command } => run_snapshot(&manager, command, cli.verbose),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if cli.debug.is_some() {
                eprintln!("{} {:?}", "[ERROR]".red(), e);
            } else {
                error(&e.to_string());
            }
            ExitCode::FAILURE
        }
    }
}
