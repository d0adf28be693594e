// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

/// Common argument: skip the confirmation prompt
fn yes_arg() -> Arg {
    Arg::new("yes")
        .short('y')
        .long("yes")
        .action(ArgAction::SetTrue)
        .help("Do not ask for confirmation")
}

fn branch_arg() -> Arg {
    Arg::new("branch").required(true).help("Branch name")
}

fn build_cli() -> Command {
    Command::new("buildfarm")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Buildfarm Contributors")
        .about("Build scheduler and repository publisher for a distribution build farm")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("PATH")
                .global(true)
                .help("Path to the configuration file"),
        )
        .subcommand(
            Command::new("init")
                .about("Create the database, repository roots and job service state"),
        )
        .subcommand(
            Command::new("serve").about("Run the status sync timer until a fatal error occurs"),
        )
        .subcommand(
            Command::new("build")
                .about("Run one build pass")
                .arg(
                    Arg::new("force_repo_update")
                        .long("force-repo-update")
                        .value_name("BRANCH")
                        .help("Republish this branch even if nothing new was built"),
                )
                .arg(
                    Arg::new("no_repo_update")
                        .long("no-repo-update")
                        .action(ArgAction::SetTrue)
                        .help("Never update the symlink and final repositories"),
                ),
        )
        .subcommand(
            Command::new("reconcile")
                .about("Sync the status of building jobs with the job service"),
        )
        .subcommand(
            Command::new("status").about("Show package, image and repo bootstrap counts"),
        )
        .subcommand(
            Command::new("staging")
                .about("Staging branch management")
                .subcommand_required(true)
                .subcommand(
                    Command::new("init")
                        .about("Create a staging branch (<origin>_staging_<name>)")
                        .arg(branch_arg()),
                )
                .subcommand(
                    Command::new("remove")
                        .about("Delete a staging branch with its repositories and packages")
                        .arg(branch_arg()),
                )
                .subcommand(Command::new("list").about("List configured and staging branches")),
        )
        .subcommand(
            Command::new("get-depends")
                .about("Start a job that refreshes packages and dependencies of a branch")
                .arg(branch_arg()),
        )
        .subcommand(
            Command::new("reset")
                .about("Maintenance status resets")
                .subcommand_required(true)
                .subcommand(
                    Command::new("building-to-failed")
                        .about("Mark every building package, image and repo bootstrap as failed")
                        .arg(yes_arg()),
                )
                .subcommand(
                    Command::new("failed-to-queued")
                        .about("Queue every failed package, image and repo bootstrap again")
                        .arg(yes_arg()),
                ),
        )
        .subcommand(
            Command::new("callback")
                .about("Deliver the results of a job to a callback endpoint")
                .arg(Arg::new("endpoint").required(true).help("Callback endpoint"))
                .arg(
                    Arg::new("header")
                        .short('H')
                        .long("header")
                        .value_name("KEY=VALUE")
                        .action(ArgAction::Append)
                        .help("Identity header (repeatable)"),
                )
                .arg(
                    Arg::new("files")
                        .num_args(0..)
                        .help("Files to upload"),
                ),
        )
        .subcommand(
            Command::new("completions")
                .about("Generate shell completion scripts")
                .arg(
                    Arg::new("shell")
                        .required(true)
                        .value_parser(["bash", "zsh", "fish", "powershell", "elvish"])
                        .help("Shell type"),
                ),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // Create man directory - use CARGO_MANIFEST_DIR which is always set by cargo
    let manifest_dir = match env::var("CARGO_MANIFEST_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(e) => {
            println!("cargo:warning=CARGO_MANIFEST_DIR not set: {}", e);
            return;
        }
    };
    let man_dir = manifest_dir.join("man");

    if let Err(e) = fs::create_dir_all(&man_dir) {
        println!("cargo:warning=Failed to create man directory: {}", e);
        return;
    }

    let cmd = build_cli();
    let man = Man::new(cmd);
    let mut buffer = Vec::new();

    if let Err(e) = man.render(&mut buffer) {
        println!("cargo:warning=Failed to render man page: {}", e);
        return;
    }

    let man_path = man_dir.join("buildfarm.1");
    if let Err(e) = fs::write(&man_path, buffer) {
        println!("cargo:warning=Failed to write man page: {}", e);
    }
}
