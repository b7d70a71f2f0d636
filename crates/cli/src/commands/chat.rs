//! `conclave chat`: an interactive session. Later messages see earlier
//! ones as conversation history; `/retry` retries the last task.

use conclave_orchestrator::{Orchestrator, UserRequest};
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};
use uuid::Uuid;

use super::{LOCAL_USER, build_runtime, drive};

/// What one line of input asks for.
#[derive(Debug, PartialEq)]
pub enum Input<'a> {
    Message(&'a str),
    Retry,
    Exit,
    Empty,
}

pub fn parse_input(line: &str) -> Input<'_> {
    match line.trim() {
        "" => Input::Empty,
        "/exit" | "/quit" | "exit" => Input::Exit,
        "/retry" => Input::Retry,
        message => Input::Message(message),
    }
}

pub async fn run(model: Option<String>, ollama: bool) -> anyhow::Result<()> {
    let orchestrator = build_runtime(ollama).await?;

    println!();
    println!("  Conclave interactive mode");
    println!("  Type a message and press Enter. `/retry` retries the last task, `/exit` quits.");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut last_task: Option<Uuid> = None;

    loop {
        print!("  You > ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };

        match parse_input(&line) {
            Input::Empty => continue,
            Input::Exit => break,
            Input::Retry => match last_task {
                Some(task_id) => retry(&orchestrator, task_id, &mut last_task).await,
                None => eprintln!("  Nothing to retry yet."),
            },
            Input::Message(message) => {
                let request = UserRequest::new(LOCAL_USER, message).with_model(model.as_deref());
                match drive(&orchestrator, orchestrator.handle_user_message(request)).await {
                    Ok(task_id) => last_task = Some(task_id),
                    Err(e) => eprintln!("  [Error] {e}"),
                }
            }
        }
    }

    println!();
    println!("  Goodbye!");
    Ok(())
}

async fn retry(orchestrator: &Orchestrator, task_id: Uuid, last_task: &mut Option<Uuid>) {
    match drive(orchestrator, orchestrator.retry_task(LOCAL_USER, task_id)).await {
        Ok(retry_id) => *last_task = Some(retry_id),
        Err(e) => eprintln!("  [Error] {e}"),
    }
}
