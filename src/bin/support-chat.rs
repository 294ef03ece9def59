use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use supportbench::prompt::PromptBuilder;
use supportbench::providers::openai::OpenAI;
use supportbench::scenarios::{ScenarioStore, ISSUE_LABELS};
use supportbench::session::SupportSession;
use supportbench::OrderStore;

#[derive(Parser)]
#[command(name = "support-chat")]
#[command(about = "Interactive two-phase support agent session")]
struct Args {
    /// Scenario template configuration
    #[arg(long, default_value = "data/scenarios.yaml")]
    scenarios: PathBuf,

    /// SQLite order database (created if missing)
    #[arg(long, default_value = "orders.db")]
    db: PathBuf,

    /// Agent model (defaults to the SUPPORT_MODEL env var)
    #[arg(long)]
    model: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let model = args
        .model
        .or_else(|| std::env::var("SUPPORT_MODEL").ok())
        .ok_or("no agent model: pass --model or set SUPPORT_MODEL")?;

    let scenarios = ScenarioStore::load(&args.scenarios)?;
    let store = Arc::new(OrderStore::open(&args.db)?);
    let provider = Arc::new(OpenAI::from_env()?);

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();

    println!("Welcome to Zwiggy support!");
    println!("\nPlease select your issue by number:");
    // The menu covers the seven resolvable issues; tracking questions go
    // through the tracker inside any conversation.
    let menu: Vec<&str> = ISSUE_LABELS
        .iter()
        .copied()
        .filter(|label| *label != "TRACK")
        .collect();
    for (index, label) in menu.iter().enumerate() {
        println!("{}. {}", index + 1, title_case(label));
    }
    println!("Type the number (1-{}): ", menu.len());

    let issue_label = loop {
        print!("You: ");
        io::stdout().flush()?;
        let Some(line) = lines.next() else {
            return Ok(());
        };
        match line?.trim().parse::<usize>() {
            Ok(selection) if (1..=menu.len()).contains(&selection) => break menu[selection - 1],
            Ok(_) => println!("Invalid number. Please choose 1-{}.", menu.len()),
            Err(_) => println!("Please enter a number."),
        }
    };

    let template = scenarios.template_or_fallback(issue_label);
    let order = store.create_order(issue_label, &template)?;
    println!(
        "[SYSTEM INFO]: Assigned to scenario for order {} with issue '{issue_label}'.",
        order.order_id
    );

    let prompt = PromptBuilder::new(&scenarios).build(issue_label)?;
    let mut session = SupportSession::new(
        provider,
        model,
        store,
        prompt,
        order.order_id.clone(),
        issue_label,
    )?;

    println!(
        "\nYour order ID is {}. Tell me more about the issue:",
        order.order_id
    );

    let mut resolved = false;
    loop {
        print!("You: ");
        io::stdout().flush()?;
        let Some(line) = lines.next() else { break };
        let user_input = line?;
        let user_input = user_input.trim();
        if user_input.eq_ignore_ascii_case("exit") {
            break;
        }
        if user_input.is_empty() {
            continue;
        }

        let turn = session.send(user_input).await?;
        for invocation in &turn.tool_invocations {
            println!("[TOOL RESULT - {}]: {}", invocation.name, invocation.output);
        }
        println!("Zwiggy: {}", turn.reply);

        if turn.awaiting_confirmation {
            print!("You: ");
            io::stdout().flush()?;
            let Some(line) = lines.next() else { break };
            let confirmation = line?;
            let confirmation = confirmation.trim();
            if confirmation.eq_ignore_ascii_case("yes") || confirmation.eq_ignore_ascii_case("y") {
                println!(
                    "Zwiggy: Great! If you have more questions, feel free to start a new chat. \
                     Thank you for using Zwiggy!"
                );
                resolved = true;
                break;
            }
            // Anything else goes back to the agent on the next turn.
            session.note_user_reply(confirmation);
        }
    }

    if resolved {
        println!("\n--- RESOLUTION CONFIRMED ---");
    }
    println!("\n--- CONVERSATION SUMMARY ---");
    println!(
        "Assigned Scenario Order: {}, Issue: {issue_label}",
        session.order_id()
    );
    println!("--------------------------\n");
    println!("Ending conversation...");

    Ok(())
}

fn title_case(label: &str) -> String {
    let lowered = label.to_lowercase();
    let mut chars = lowered.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}
