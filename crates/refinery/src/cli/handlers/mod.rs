//! Turn parsed arguments into command options.

use anyhow::Result;
use clap::ArgMatches;
use refinery_core::{
    mr::MrStatus,
    queue::{QueueFilter, StatusSelection},
};

use crate::commands::{
    list::{self, ListOptions},
    reject::{self, RejectOptions},
    retry::{self, RetryOptions},
    run::{self, RunOptions},
    show::{self, ShowOptions},
    submit::{self, SubmitOptions},
};

pub async fn dispatch(matches: &ArgMatches) -> Result<()> {
    match matches.subcommand() {
        Some(("submit", sub_m)) => submit::run(submit_options(sub_m)).await,
        Some(("list", sub_m)) => list::run(&list_options(sub_m)?).await,
        Some(("retry", sub_m)) => retry::run(&retry_options(sub_m)).await,
        Some(("reject", sub_m)) => reject::run(&reject_options(sub_m)).await,
        Some(("show", sub_m)) => show::run(&show_options(sub_m)).await,
        Some(("run", sub_m)) => run::run(&run_options(sub_m)).await,
        _ => anyhow::bail!("Unknown command. Run 'refinery --help' for usage."),
    }
}

fn string(matches: &ArgMatches, id: &str) -> Option<String> {
    matches.get_one::<String>(id).cloned()
}

fn required(matches: &ArgMatches, id: &str) -> String {
    string(matches, id).unwrap_or_default()
}

fn submit_options(matches: &ArgMatches) -> SubmitOptions {
    SubmitOptions {
        branch: string(matches, "branch"),
        issue: string(matches, "issue"),
        epic: string(matches, "epic"),
        priority: matches.get_one::<u32>("priority").copied(),
        blocked_by: matches
            .get_many::<String>("blocked-by")
            .map(|values| values.cloned().collect())
            .unwrap_or_default(),
        rig: string(matches, "rig"),
    }
}

fn list_options(matches: &ArgMatches) -> Result<ListOptions> {
    let status = if matches.get_flag("ready") {
        StatusSelection::Ready
    } else {
        match matches.get_one::<String>("status").map(String::as_str) {
            None => StatusSelection::Active,
            Some("all") => StatusSelection::All,
            Some(value) => StatusSelection::Stored(value.parse::<MrStatus>()?),
        }
    };
    Ok(ListOptions {
        rig: required(matches, "rig"),
        filter: QueueFilter {
            status,
            worker: string(matches, "worker"),
            epic: string(matches, "epic"),
        },
        json: matches.get_flag("json"),
    })
}

fn retry_options(matches: &ArgMatches) -> RetryOptions {
    RetryOptions {
        rig: required(matches, "rig"),
        mr_id: required(matches, "mr-id"),
        now: matches.get_flag("now"),
    }
}

fn reject_options(matches: &ArgMatches) -> RejectOptions {
    RejectOptions {
        rig: required(matches, "rig"),
        mr: required(matches, "mr"),
        reason: required(matches, "reason"),
        notify: matches.get_flag("notify"),
    }
}

fn show_options(matches: &ArgMatches) -> ShowOptions {
    ShowOptions {
        rig: required(matches, "rig"),
        mr_id: required(matches, "mr-id"),
        json: matches.get_flag("json"),
    }
}

fn run_options(matches: &ArgMatches) -> RunOptions {
    RunOptions {
        rig: required(matches, "rig"),
        once: matches.get_flag("once"),
    }
}
