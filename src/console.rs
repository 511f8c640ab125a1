//! Terminal front-end: persona menu, interactive chat loop and the
//! two-persona conversation.

use anyhow::{Context, Result};
use std::io::{self, BufRead, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use confidant_backend::chat::ChatSession;
use confidant_backend::config::AppConfig;
use confidant_backend::context::PersonaContext;
use confidant_backend::conversation::AutonomousConversation;
use confidant_backend::llm_client::CompletionService;
use confidant_backend::relationship::RelationshipTracker;
use confidant_backend::store::list_personas;

const EXIT_WORDS: [&str; 3] = ["exit", "quit", "bye"];
const DEFAULT_PERSONA: &str = "samantha";

pub async fn run_chat(
    config: &AppConfig,
    completion: Arc<dyn CompletionService>,
    persona: Option<String>,
) -> Result<()> {
    let root = config.personas_root();
    let persona = match persona {
        Some(persona) => persona,
        None => select_persona(&root)?,
    };

    let context = PersonaContext::new(&root, &persona, completion, config.persona.clone());
    let mut session = ChatSession::start(&context)
        .with_context(|| format!("Failed to load persona '{}'", persona))?;
    let name = session.assistant_name().to_string();

    println!("\nWelcome! {}\n", session.welcome());

    let stdin = io::stdin();
    loop {
        print!("You: ");
        io::stdout().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            println!("\n\n{}: Chat session ended. Goodbye!", name);
            break;
        }

        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if is_exit_command(input) {
            println!("\n{}: Goodbye! Have a great day!", name);
            break;
        }

        let reply = session.send(input).await;
        println!("\n{}: {}\n", session.assistant_name(), reply);
    }

    tracing::info!(
        "Chat with '{}' ended after {} turn(s)",
        persona,
        session.turn_count()
    );
    Ok(())
}

pub struct Pacing {
    pub turns: usize,
    pub delay: Duration,
    pub segment_size: usize,
}

pub async fn run_conversation(
    config: &AppConfig,
    completion: Arc<dyn CompletionService>,
    first: &str,
    second: &str,
    pacing: Pacing,
) -> Result<()> {
    let root = config.personas_root();
    let first = PersonaContext::new(&root, first, completion.clone(), config.persona.clone());
    let second = PersonaContext::new(&root, second, completion, config.persona.clone());

    let conversation = AutonomousConversation::new(&first, &second)?
        .with_segment_size(pacing.segment_size)
        .with_delay(pacing.delay);

    println!(
        "\nStarting conversation between {} and {}...",
        first.display_name(),
        second.display_name()
    );
    println!("{}", "=".repeat(50));

    let report = conversation
        .run(pacing.turns, |turn| println!("\n{}: {}", turn.speaker, turn.content))
        .await;

    println!("{}", "=".repeat(50));
    if report.interrupted {
        println!("The conversation stopped early after an error.");
    }
    println!(
        "{} message(s), {} segment(s) analyzed.",
        report.transcript.len(),
        report.segments_analyzed
    );
    println!("{}", standing(&first, &second.display_name()));
    println!("{}", standing(&second, &first.display_name()));
    Ok(())
}

/// One line on how `context` sees `other` after the conversation.
fn standing(context: &PersonaContext, other: &str) -> String {
    let relationship = RelationshipTracker::new(context).load(other);
    format!(
        "{} sees {} as {} (trust: {}).",
        context.display_name(),
        other,
        relationship.current_status().unwrap_or("a stranger"),
        relationship.trust_level().unwrap_or("unknown")
    )
}

/// Numbered menu over the persona directories; an empty root starts the
/// default persona.
fn select_persona(root: &Path) -> Result<String> {
    let personas = list_personas(root);
    if personas.is_empty() {
        tracing::info!(
            "No personas in {:?}, starting '{}'",
            root,
            DEFAULT_PERSONA
        );
        return Ok(DEFAULT_PERSONA.to_string());
    }

    let stdin = io::stdin();
    loop {
        println!("\nAvailable personalities:");
        for (i, name) in personas.iter().enumerate() {
            println!("{}. {}", i + 1, name);
        }
        print!("\nSelect a personality (enter number): ");
        io::stdout().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            anyhow::bail!("No persona selected");
        }

        match parse_choice(&line, personas.len()) {
            Some(index) => return Ok(personas[index].clone()),
            None => println!("Please enter a number between 1 and {}.", personas.len()),
        }
    }
}

/// 1-based menu entry → 0-based index.
fn parse_choice(input: &str, count: usize) -> Option<usize> {
    let choice: usize = input.trim().parse().ok()?;
    (1..=count).contains(&choice).then(|| choice - 1)
}

fn is_exit_command(input: &str) -> bool {
    EXIT_WORDS
        .iter()
        .any(|word| input.trim().eq_ignore_ascii_case(word))
}
