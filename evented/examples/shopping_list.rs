//! A shopping list that survives restarts.
//!
//! ```sh
//! cargo run --example shopping_list -- add milk
//! cargo run --example shopping_list -- remove milk
//! cargo run --example shopping_list -- clear
//! cargo run --example shopping_list
//! ```
//!
//! Data is kept under `EVENTED_DATA_DIR`, or the platform data directory.

use std::collections::BTreeSet;

use anyhow::{Context, bail};
use evented::prelude::*;
use futures::channel::oneshot;
use serde::{Deserialize, Serialize};
use tracing_subscriber::fmt::time::ChronoLocal;

#[derive(Debug)]
enum ListCmd {
    Add(String),
    Remove(String),
    Clear,
    Show(oneshot::Sender<BTreeSet<String>>),
}

#[derive(Debug, Serialize, Deserialize)]
enum ListEvt {
    Added(String),
    Removed(String),
    Cleared,
}

type ShoppingList = EventSourcedBehavior<ListCmd, ListEvt, BTreeSet<String>>;

fn shopping_list(name: &str) -> anyhow::Result<ShoppingList> {
    let commands = CommandHandler::<ListCmd, ListEvt, BTreeSet<String>>::builder()
        .on_command(
            |c| matches!(c, ListCmd::Show(_)),
            |_, c| match c {
                ListCmd::Show(tx) => Effect::none().then_run(move |s: &BTreeSet<String>| {
                    let _ = tx.send(s.clone());
                }),
                _ => Effect::unhandled(),
            },
        )
        .for_state(|s: &BTreeSet<String>| s.is_empty())
        .on_command(|c| matches!(c, ListCmd::Clear), |_, _| Effect::unhandled())
        .for_any_state()
        .on_any_command(|s, c| match c {
            ListCmd::Add(item) if s.contains(&item) => Effect::none(),
            ListCmd::Add(item) => Effect::persist(ListEvt::Added(item)),
            ListCmd::Remove(item) if s.contains(&item) => Effect::persist(ListEvt::Removed(item)),
            ListCmd::Remove(_) => Effect::unhandled(),
            ListCmd::Clear => Effect::persist(ListEvt::Cleared),
            ListCmd::Show(_) => Effect::unhandled(),
        })
        .build();

    let events = EventHandler::from_fn(|s: &BTreeSet<String>, e: &ListEvt| {
        let mut s = s.clone();
        match e {
            ListEvt::Added(item) => {
                s.insert(item.clone());
            }
            ListEvt::Removed(item) => {
                s.remove(item);
            }
            ListEvt::Cleared => s.clear(),
        }
        s
    });

    Ok(EventSourcedBehavior::new(
        PersistenceId::of("ShoppingList", name)?,
        BTreeSet::new(),
        commands,
        events,
    )
    .with_retention(RetentionCriteria::snapshot_every(10, 2)?.with_delete_events_on_snapshot())
    .with_signal_handler(|s, signal| match signal {
        Signal::RecoveryCompleted { sequence_nr } => {
            println!("recovered {} items at sequence nr {sequence_nr}", s.len())
        }
        other => eprintln!("{other:?}"),
    }))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("warn,evented=info")
        .with_timer(ChronoLocal::new("%Y-%m-%d %H:%M:%S%.3f %Z".into()))
        .init();

    let config = PersistenceConfig::from_env().context("invalid EVENTED_* environment")?;
    println!("data in {}", config.data_dir.display());

    let ctx = RootContext::local_fs(config);
    let list = ctx.spawn(shopping_list("home")?)?;

    let args: Vec<String> = std::env::args().skip(1).collect();
    let cmd = match args.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
        [] => None,
        ["add", item] => Some(ListCmd::Add(item.to_string())),
        ["remove", item] => Some(ListCmd::Remove(item.to_string())),
        ["clear"] => Some(ListCmd::Clear),
        _ => bail!("usage: shopping_list [add <item> | remove <item> | clear]"),
    };

    if let Some(cmd) = cmd {
        match list.ask(cmd).await? {
            Outcome::Persisted { sequence_nr } => println!("saved as event {sequence_nr}"),
            Outcome::Applied => println!("nothing to change"),
            Outcome::Unhandled => println!("not applicable to the current list"),
        }
    }

    let (tx, rx) = oneshot::channel();
    list.tell(ListCmd::Show(tx))?;
    for item in rx.await? {
        println!("- {item}");
    }

    list.stop().await;

    Ok(())
}
