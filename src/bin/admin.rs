//! Admin CLI for the analytics registry: load, dump, enable, disable.

use redis::aio::ConnectionManager;
use tracing_subscriber::EnvFilter;

use facet_api::config::Settings;
use facet_api::{registry, store};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("facet_api=info")
        }))
        .init();

    let args: Vec<String> = std::env::args().collect();
    let program = args.first().map(String::as_str).unwrap_or("facet-admin");
    let Some(command) = args.get(1).map(|c| c.to_ascii_lowercase()) else {
        print_usage(program);
        return Ok(());
    };

    let settings = Settings::from_env();
    let mut conf = store::config_connection(&settings).await?;

    match command.as_str() {
        "load" => {
            let mut rest = &args[2..];
            // `load -2 file.json` stores the definition with data_db = 2.
            let mut db_override = None;
            if let Some(first) = rest.first() {
                if let Some(db) = first.strip_prefix('-') {
                    db_override = Some(db.parse::<i64>()?);
                    rest = &rest[1..];
                }
            }
            for path in rest {
                let raw = std::fs::read_to_string(path)?;
                match registry::load_analytics(&mut conf, &raw, db_override).await {
                    Ok(name) => println!("loaded analytics '{name}'"),
                    Err(err) => eprintln!("{path}: {err:#}"),
                }
            }
        }
        "dump" => {
            for name in &args[2..] {
                dump(&mut conf, name).await?;
            }
        }
        "dumpall" => {
            for name in registry::active_analytics(&mut conf).await? {
                dump(&mut conf, &name).await?;
            }
        }
        "disable" => {
            for name in &args[2..] {
                registry::disable_analytics(&mut conf, name).await?;
                println!("disabled '{name}'");
            }
        }
        "enable" => {
            for name in &args[2..] {
                registry::enable_analytics(&mut conf, name).await?;
                println!("enabled '{name}'");
            }
        }
        "commands" | "help" => print_usage(program),
        other => {
            eprintln!("error: {other} is not in the list of commands");
            print_usage(program);
        }
    }
    Ok(())
}

async fn dump(conf: &mut ConnectionManager, name: &str) -> anyhow::Result<()> {
    match registry::dump_analytics(conf, name).await? {
        Some(raw) => {
            let path = format!("{name}.json");
            std::fs::write(&path, raw)?;
            println!("dumped '{path}'");
        }
        None => eprintln!("analytics '{name}' is not loaded"),
    }
    Ok(())
}

fn print_usage(program: &str) {
    println!(
        "\
Usage: {program} <command> [<arg>...]
Commands:
  load [-<db>] <file.json>... - Load one or more analytics definitions and activate them.
  dump <name>...              - Dump stored analytics back to <name>.json files.
  dumpall                     - Dump all active analytics.
  enable <name>...            - Activate previously loaded analytics.
  disable <name>...           - Deactivate analytics.
  commands | help             - Display this."
    );
}
