//! stride — command-line front end for the routine data engine.
//!
//! Usage: stride <command> [args]
//!
//! Rendering stays plain text on purpose; every data operation goes
//! through the [`AppController`] exactly the way a richer front end
//! would drive it.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use chrono::Utc;

use stride::config::Config;
use stride::controller::{AppController, ChallengeDraft, ChallengeEdit, TabEdit};
use stride::models::{
    challenges_for_tab, format_completion_time, format_duration, ChallengeSession, Icon,
    RunProgress, Session, TabColor, TimerSession, TimerType,
};
use stride::remote::RemoteSync;
use stride::store::{generate_id, LocalStore};

const USAGE: &str = "\
stride — visual routine sequencing

Usage:
  stride list                          show tabs and the active tab's challenges
  stride add <text> [options]          add a challenge to the active tab
      --icon <emoji|set:name|data:…>   icon (default ⭐)
      --tab <tab-id>                   target tab
      --timer <up|down>                attach a timer
      --duration <secs>                countdown length (timer down only)
  stride edit <id> [options]           change text/icon/timer of a challenge
      --text <text> --icon <icon> --timer <none|up|down> --duration <secs>
  stride done <id> <seconds>           record one completion
  stride rm <id>                       delete a challenge
  stride move <id> <delta>             shift a challenge up (-) or down (+)
  stride tabs                          list tabs
  stride tabs add <name> [--color <token>] [--icon <emoji>]
  stride tabs edit <id> [--name <name>] [--color <token>] [--icon <emoji>]
  stride tabs rm <id>
  stride tabs move <id> <delta>
  stride tabs use <id>                 switch the active tab
  stride run                           step through the active tab, timed
  stride export [file]                 write a JSON backup (stdout if no file)
  stride import <file>                 restore from a JSON backup
  stride sync                          show remote sync status
  stride reset                         restore the built-in sample dataset
  stride sound <on|off>                toggle completion sounds
  stride icons [add <ref> | rm <ref>]  manage the custom icon list
  stride config                        show configuration paths
";

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first().map(String::as_str) else {
        eprint!("{USAGE}");
        std::process::exit(1);
    };

    if command == "config" {
        return cmd_config();
    }

    let config = Config::load().unwrap_or_else(|e| {
        tracing::warn!("could not load config, using defaults: {e}");
        Config::default()
    });
    let store = open_store(&config)?;
    let remote = RemoteSync::from_config(&config);
    let mut controller = AppController::new(store, remote);
    controller.startup().await;

    let rest = &args[1..];
    let result = match command {
        "list" => cmd_list(&controller),
        "add" => cmd_add(&mut controller, rest).await,
        "edit" => cmd_edit(&mut controller, rest).await,
        "done" => cmd_done(&mut controller, rest).await,
        "rm" => cmd_rm(&mut controller, rest).await,
        "move" => cmd_move(&mut controller, rest).await,
        "tabs" => cmd_tabs(&mut controller, rest).await,
        "run" => cmd_run(&mut controller).await,
        "export" => cmd_export(&controller, rest),
        "import" => cmd_import(&mut controller, rest).await,
        "sync" => cmd_sync(&mut controller),
        "reset" => cmd_reset(&mut controller).await,
        "sound" => cmd_sound(&controller, rest),
        "icons" => cmd_icons(&controller, rest),
        _ => {
            eprint!("{USAGE}");
            std::process::exit(1);
        }
    };

    controller.shutdown();
    if controller.storage_degraded() {
        eprintln!("warning: some changes could not be written to local storage");
    }
    result
}

fn open_store(config: &Config) -> Result<LocalStore> {
    match &config.storage.data_dir {
        Some(dir) if !dir.is_empty() => {
            let dir = PathBuf::from(dir);
            std::fs::create_dir_all(&dir).context("Failed to create data directory")?;
            LocalStore::open_at(&dir.join("stride.redb"))
        }
        _ => LocalStore::open(),
    }
}

/// Split `--flag value` pairs from positional args.
fn parse_flags(args: &[String]) -> (Vec<String>, Vec<(String, String)>) {
    let mut positional = Vec::new();
    let mut flags = Vec::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if let Some(name) = arg.strip_prefix("--") {
            let value = iter.next().cloned().unwrap_or_default();
            flags.push((name.to_string(), value));
        } else {
            positional.push(arg.clone());
        }
    }
    (positional, flags)
}

fn flag<'a>(flags: &'a [(String, String)], name: &str) -> Option<&'a str> {
    flags
        .iter()
        .find(|(n, _)| n == name)
        .map(|(_, v)| v.as_str())
}

fn parse_color(token: &str) -> Result<TabColor> {
    TabColor::all()
        .into_iter()
        .find(|c| c.token() == token)
        .with_context(|| {
            let tokens: Vec<&str> = TabColor::all().iter().map(|c| c.token()).collect();
            format!("unknown color {token:?} (expected one of {})", tokens.join(", "))
        })
}

fn parse_timer(value: &str) -> Result<TimerType> {
    match value {
        "none" => Ok(TimerType::None),
        "up" => Ok(TimerType::Up),
        "down" => Ok(TimerType::Down),
        other => bail!("unknown timer type {other:?} (expected none, up or down)"),
    }
}

fn print_sync_status(controller: &AppController) {
    if controller.remote_configured() {
        println!("({})", controller.sync_status().label());
    }
}

fn cmd_list(controller: &AppController) -> Result<()> {
    let tabs = controller.tabs();
    if tabs.is_empty() {
        println!("(no tabs yet)");
    }
    for tab in tabs {
        let marker = if controller.active_tab_id() == Some(tab.id.as_str()) {
            "*"
        } else {
            " "
        };
        let icon = tab.icon.as_deref().unwrap_or(" ");
        println!(
            "{marker} [{}] {icon} {} ({}, {})",
            tab.id,
            tab.name,
            tab.color.label(),
            tab.color.hex()
        );
    }

    let Some(active) = controller.active_tab_id() else {
        // Pre-migration data: show everything
        for challenge in controller.challenges() {
            print_challenge(challenge);
        }
        return Ok(());
    };
    let active = active.to_string();
    println!();
    for challenge in challenges_for_tab(&active, controller.challenges(), controller.tabs()) {
        print_challenge(challenge);
    }
    Ok(())
}

fn print_challenge(challenge: &stride::models::Challenge) {
    let timer = match challenge.timer_type {
        TimerType::None => String::new(),
        TimerType::Up => "  [timer: up]".to_string(),
        TimerType::Down => format!(
            "  [timer: {}]",
            format_duration(challenge.timer_duration.unwrap_or(0))
        ),
    };
    let best = match challenge.best_time {
        Some(best) => format!("  best {}", format_completion_time(best)),
        None => String::new(),
    };
    println!(
        "  {:>2}. {} {} ({}){timer}{best}",
        challenge.order,
        challenge.icon,
        challenge.text,
        challenge.id
    );
}

async fn cmd_add(controller: &mut AppController, args: &[String]) -> Result<()> {
    let (positional, flags) = parse_flags(args);
    let Some(text) = positional.first() else {
        bail!("usage: stride add <text> [options]");
    };

    let mut draft = ChallengeDraft::new(
        text.clone(),
        flag(&flags, "icon").map(Icon::parse).unwrap_or_default(),
    );
    draft.tab_id = flag(&flags, "tab").map(str::to_string);
    if let Some(timer) = flag(&flags, "timer") {
        draft.timer_type = parse_timer(timer)?;
    }
    if let Some(duration) = flag(&flags, "duration") {
        draft.timer_duration = Some(duration.parse().context("--duration must be seconds")?);
    }

    let id = controller.add_challenge(draft).await?;
    println!("added {id}");
    print_sync_status(controller);
    Ok(())
}

async fn cmd_edit(controller: &mut AppController, args: &[String]) -> Result<()> {
    let (positional, flags) = parse_flags(args);
    let Some(id) = positional.first() else {
        bail!("usage: stride edit <id> [options]");
    };

    let mut edit = ChallengeEdit {
        text: flag(&flags, "text").map(str::to_string),
        icon: flag(&flags, "icon").map(Icon::parse),
        ..Default::default()
    };
    if let Some(tab) = flag(&flags, "tab") {
        edit.tab_id = Some(Some(tab.to_string()));
    }
    if let Some(timer) = flag(&flags, "timer") {
        edit.timer_type = Some(parse_timer(timer)?);
    }
    if let Some(duration) = flag(&flags, "duration") {
        edit.timer_duration = Some(Some(
            duration.parse().context("--duration must be seconds")?,
        ));
    }

    controller.edit_challenge(id, edit).await?;
    println!("updated {id}");
    print_sync_status(controller);
    Ok(())
}

async fn cmd_done(controller: &mut AppController, args: &[String]) -> Result<()> {
    let (id, seconds) = match args {
        [id, seconds] => (id, seconds.parse::<u32>().context("seconds must be a number")?),
        _ => bail!("usage: stride done <id> <seconds>"),
    };
    controller.complete_challenge(id, seconds).await?;
    println!("recorded {} for {id}", format_completion_time(seconds));
    print_sync_status(controller);
    Ok(())
}

async fn cmd_rm(controller: &mut AppController, args: &[String]) -> Result<()> {
    let Some(id) = args.first() else {
        bail!("usage: stride rm <id>");
    };
    controller.delete_challenge(id).await?;
    println!("deleted {id}");
    print_sync_status(controller);
    Ok(())
}

async fn cmd_move(controller: &mut AppController, args: &[String]) -> Result<()> {
    let (id, delta) = match args {
        [id, delta] => (id, delta.parse::<i32>().context("delta must be an integer")?),
        _ => bail!("usage: stride move <id> <delta>"),
    };
    controller.move_challenge(id, delta).await?;
    println!("moved {id}");
    print_sync_status(controller);
    Ok(())
}

async fn cmd_tabs(controller: &mut AppController, args: &[String]) -> Result<()> {
    let Some(sub) = args.first().map(String::as_str) else {
        for tab in controller.tabs() {
            let marker = if controller.active_tab_id() == Some(tab.id.as_str()) {
                "*"
            } else {
                " "
            };
            println!(
                "{marker} {:>2}. [{}] {} ({})",
                tab.order,
                tab.id,
                tab.name,
                tab.color.token()
            );
        }
        return Ok(());
    };

    let rest = &args[1..];
    match sub {
        "add" => {
            let (positional, flags) = parse_flags(rest);
            let Some(name) = positional.first() else {
                bail!("usage: stride tabs add <name> [--color <token>] [--icon <emoji>]");
            };
            let color = match flag(&flags, "color") {
                Some(token) => parse_color(token)?,
                None => TabColor::SoftBlue,
            };
            let icon = flag(&flags, "icon").map(str::to_string);
            let id = controller.add_tab(name, color, icon)?;
            println!("added tab {id}");
        }
        "edit" => {
            let (positional, flags) = parse_flags(rest);
            let Some(id) = positional.first() else {
                bail!("usage: stride tabs edit <id> [options]");
            };
            let mut edit = TabEdit {
                name: flag(&flags, "name").map(str::to_string),
                ..Default::default()
            };
            if let Some(token) = flag(&flags, "color") {
                edit.color = Some(parse_color(token)?);
            }
            if let Some(icon) = flag(&flags, "icon") {
                edit.icon = Some(Some(icon.to_string()));
            }
            controller.edit_tab(id, edit)?;
            println!("updated tab {id}");
        }
        "rm" => {
            let Some(id) = rest.first() else {
                bail!("usage: stride tabs rm <id>");
            };
            controller.delete_tab(id).await?;
            println!("deleted tab {id}");
        }
        "move" => {
            let (id, delta) = match rest {
                [id, delta] => (id, delta.parse::<i32>().context("delta must be an integer")?),
                _ => bail!("usage: stride tabs move <id> <delta>"),
            };
            controller.move_tab(id, delta)?;
            println!("moved tab {id}");
        }
        "use" => {
            let Some(id) = rest.first() else {
                bail!("usage: stride tabs use <id>");
            };
            controller.set_active_tab(id)?;
            println!("active tab is now {id}");
        }
        other => bail!("unknown tabs subcommand {other:?}"),
    }
    Ok(())
}

/// Step through the active tab's challenges, timing each one, then
/// record the run as an immutable session.
async fn cmd_run(controller: &mut AppController) -> Result<()> {
    let Some(active) = controller.active_tab_id().map(str::to_string) else {
        bail!("no active tab — create one with `stride tabs add`");
    };
    let challenges: Vec<_> = challenges_for_tab(&active, controller.challenges(), controller.tabs())
        .into_iter()
        .cloned()
        .collect();
    if challenges.is_empty() {
        bail!("the active tab has no challenges");
    }

    let sound = controller.store().sound_enabled();
    let started_at = Utc::now();
    let mut completed: Vec<ChallengeSession> = Vec::new();
    let stdin = io::stdin();

    for (index, challenge) in challenges.iter().enumerate() {
        controller.store().save_run_progress(&RunProgress {
            tab_id: Some(active.clone()),
            challenge_index: index,
            completed: completed.clone(),
            started_at,
        });

        println!();
        println!(
            "({}/{}) {} {}",
            index + 1,
            challenges.len(),
            challenge.icon,
            challenge.text
        );
        if challenge.timer_type == TimerType::Down {
            println!(
                "    try to finish within {}",
                format_duration(challenge.timer_duration.unwrap_or(0))
            );
        }
        print!("    press Enter when done... ");
        io::stdout().flush()?;

        let timer_started = Instant::now();
        controller.store().save_timer_session(&TimerSession {
            item_id: challenge.id.clone(),
            timer_type: challenge.timer_type,
            start_time: Utc::now().timestamp_millis(),
            elapsed_seconds: 0,
            duration: challenge.timer_duration,
            is_running: true,
            is_paused: false,
        });

        let mut line = String::new();
        stdin.lock().read_line(&mut line)?;
        let seconds = timer_started.elapsed().as_secs() as u32;
        controller.store().clear_timer_session();

        controller.complete_challenge(&challenge.id, seconds).await?;
        completed.push(ChallengeSession {
            challenge_id: challenge.id.clone(),
            time_taken: seconds,
            order: index as u32 + 1,
        });
        if sound {
            print!("\x07");
        }
        println!("    done in {}", format_completion_time(seconds));
    }

    let total_time = completed.iter().map(|c| c.time_taken).sum();
    let session = Session {
        id: generate_id(),
        date: started_at,
        challenges: completed,
        total_time,
    };
    controller.complete_session(session).await?;

    println!();
    println!("🎉 run complete — {} total", format_completion_time(total_time));
    print_sync_status(controller);
    Ok(())
}

fn cmd_export(controller: &AppController, args: &[String]) -> Result<()> {
    let snapshot = controller.export();
    match args.first() {
        Some(path) => {
            std::fs::write(path, &snapshot).context("Failed to write backup file")?;
            println!("exported to {path}");
        }
        None => println!("{snapshot}"),
    }
    Ok(())
}

async fn cmd_import(controller: &mut AppController, args: &[String]) -> Result<()> {
    let Some(path) = args.first() else {
        bail!("usage: stride import <file>");
    };
    let text = std::fs::read_to_string(path).context("Failed to read backup file")?;
    let summary = controller.import(&text).await?;
    println!(
        "imported {} challenges and {} sessions",
        summary.challenges, summary.sessions
    );
    print_sync_status(controller);
    Ok(())
}

fn cmd_sync(controller: &mut AppController) -> Result<()> {
    let applied = controller.drain_sync_events();
    if applied > 0 {
        println!("applied {applied} remote update(s)");
    }
    if controller.remote_configured() {
        println!("remote: configured ({})", controller.remote_backend());
    } else {
        println!("remote: not configured (edit the [remote] section of the config)");
    }
    println!("status: {}", controller.sync_status().label());
    println!(
        "{} challenges, {} sessions",
        controller.challenges().len(),
        controller.sessions().len()
    );
    Ok(())
}

async fn cmd_reset(controller: &mut AppController) -> Result<()> {
    let defaults = LocalStore::export_snapshot(&stride::store::default_data());
    let summary = controller.import(&defaults).await?;
    println!("reset to {} sample challenges", summary.challenges);
    Ok(())
}

fn cmd_sound(controller: &AppController, args: &[String]) -> Result<()> {
    match args.first().map(String::as_str) {
        Some("on") => {
            controller.store().set_sound_enabled(true);
            println!("sound on");
        }
        Some("off") => {
            controller.store().set_sound_enabled(false);
            println!("sound off");
        }
        None => println!(
            "sound is {}",
            if controller.store().sound_enabled() { "on" } else { "off" }
        ),
        Some(other) => bail!("usage: stride sound <on|off>, got {other:?}"),
    }
    Ok(())
}

fn cmd_icons(controller: &AppController, args: &[String]) -> Result<()> {
    let store = controller.store();
    match args.first().map(String::as_str) {
        None => {
            for icon in store.custom_icons() {
                println!("{icon}");
            }
        }
        Some("add") => {
            let Some(reference) = args.get(1) else {
                bail!("usage: stride icons add <ref>");
            };
            let mut icons = store.custom_icons();
            if !icons.contains(reference) {
                icons.push(Icon::parse(reference).to_string());
                store.save_custom_icons(&icons);
            }
            println!("saved {reference}");
        }
        Some("rm") => {
            let Some(reference) = args.get(1) else {
                bail!("usage: stride icons rm <ref>");
            };
            let mut icons = store.custom_icons();
            icons.retain(|icon| icon != reference);
            store.save_custom_icons(&icons);
            println!("removed {reference}");
        }
        Some(other) => bail!("unknown icons subcommand {other:?}"),
    }
    Ok(())
}

fn cmd_config() -> Result<()> {
    println!("config file: {}", Config::config_path()?.display());
    if let Some(path) = LocalStore::default_path() {
        println!("data file:   {}", path.display());
    }
    println!();
    println!("example configuration:");
    print!("{}", Config::example_config());
    Ok(())
}
