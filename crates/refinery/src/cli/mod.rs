pub mod handlers;

use clap::{value_parser, Arg, ArgAction, Command};

pub fn build_cli() -> Command {
    Command::new("refinery")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Merge queue for agent work branches")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(cmd_submit())
        .subcommand(cmd_list())
        .subcommand(cmd_retry())
        .subcommand(cmd_reject())
        .subcommand(cmd_show())
        .subcommand(cmd_run())
}

fn rig_arg() -> Arg {
    Arg::new("rig").required(true).help("Rig name")
}

fn cmd_submit() -> Command {
    Command::new("submit")
        .about("Submit the current branch to the merge queue")
        .arg(
            Arg::new("branch")
                .long("branch")
                .help("Branch to submit (default: current branch)"),
        )
        .arg(
            Arg::new("issue")
                .long("issue")
                .help("Source issue (default: parsed from the branch)"),
        )
        .arg(
            Arg::new("epic")
                .long("epic")
                .help("Target integration/<epic> instead of the main branch"),
        )
        .arg(
            Arg::new("priority")
                .long("priority")
                .short('p')
                .value_parser(value_parser!(u32).range(0..=4))
                .help("Priority 0-4 (default: inherited from the source issue)"),
        )
        .arg(
            Arg::new("blocked-by")
                .long("blocked-by")
                .action(ArgAction::Append)
                .value_name("MR_ID")
                .help("Merge request that must land first (repeatable)"),
        )
        .arg(
            Arg::new("rig")
                .long("rig")
                .help("Rig name (default: inferred from the working directory)"),
        )
}

fn cmd_list() -> Command {
    Command::new("list")
        .about("Show the merge queue")
        .arg(rig_arg())
        .arg(
            Arg::new("ready")
                .long("ready")
                .action(ArgAction::SetTrue)
                .conflicts_with("status")
                .help("Only MRs ready to process"),
        )
        .arg(
            Arg::new("status")
                .long("status")
                .value_parser(["open", "in_progress", "closed", "rejected", "all"])
                .help("Filter by stored status (default: all active)"),
        )
        .arg(
            Arg::new("worker")
                .long("worker")
                .help("Filter by worker name"),
        )
        .arg(Arg::new("epic").long("epic").help("Filter by target epic"))
        .arg(
            Arg::new("json")
                .long("json")
                .action(ArgAction::SetTrue)
                .help("Output as JSON"),
        )
}

fn cmd_retry() -> Command {
    Command::new("retry")
        .about("Retry a failed merge request")
        .arg(rig_arg())
        .arg(Arg::new("mr-id").required(true).help("Merge request ID"))
        .arg(
            Arg::new("now")
                .long("now")
                .action(ArgAction::SetTrue)
                .help("Process immediately instead of on the next cycle"),
        )
}

fn cmd_reject() -> Command {
    Command::new("reject")
        .about("Reject a merge request without merging")
        .arg(rig_arg())
        .arg(
            Arg::new("mr")
                .required(true)
                .value_name("MR_ID_OR_BRANCH")
                .help("Merge request ID or branch name"),
        )
        .arg(
            Arg::new("reason")
                .long("reason")
                .short('r')
                .required(true)
                .help("Why the merge request is rejected"),
        )
        .arg(
            Arg::new("notify")
                .long("notify")
                .action(ArgAction::SetTrue)
                .help("Send the worker a rejection notice"),
        )
}

fn cmd_show() -> Command {
    Command::new("show")
        .about("Show one merge request")
        .arg(rig_arg())
        .arg(Arg::new("mr-id").required(true).help("Merge request ID"))
        .arg(
            Arg::new("json")
                .long("json")
                .action(ArgAction::SetTrue)
                .help("Output as JSON"),
        )
}

fn cmd_run() -> Command {
    Command::new("run")
        .about("Process the queue on a timer until interrupted")
        .arg(rig_arg())
        .arg(
            Arg::new("once")
                .long("once")
                .action(ArgAction::SetTrue)
                .help("Run a single cycle and exit"),
        )
}
