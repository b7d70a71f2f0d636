//! `conclave ask`: one request, start to finish.

use clap::Args;
use conclave_core::plan::Mode;
use conclave_orchestrator::UserRequest;

use super::{LOCAL_USER, build_runtime, drive};

#[derive(Args, Debug)]
pub struct AskArgs {
    /// The message to send
    pub message: String,

    /// Model override
    #[arg(short, long)]
    pub model: Option<String>,

    /// Skip classification: `daemon` or `multi_daemon`
    #[arg(long, value_parser = parse_mode)]
    pub mode: Option<Mode>,

    /// Deploy a daemon template directly by slug
    #[arg(short, long)]
    pub template: Option<String>,

    /// Use a local Ollama server instead of the configured endpoint
    #[arg(long)]
    pub ollama: bool,
}

fn parse_mode(raw: &str) -> Result<Mode, String> {
    match Mode::parse(raw) {
        Some(mode @ (Mode::Daemon | Mode::MultiDaemon)) => Ok(mode),
        _ => Err(format!("expected `daemon` or `multi_daemon`, got `{raw}`")),
    }
}

impl AskArgs {
    pub fn request(&self) -> UserRequest {
        let mut request = UserRequest::new(LOCAL_USER, &self.message).with_model(self.model.as_deref());
        if let Some(mode) = self.mode {
            request = request.with_mode(mode);
        }
        if let Some(slug) = &self.template {
            request = request.with_template(slug);
        }
        request
    }
}

pub async fn run(args: AskArgs) -> anyhow::Result<()> {
    let orchestrator = build_runtime(args.ollama).await?;
    let request = args.request();
    drive(&orchestrator, orchestrator.handle_user_message(request)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_flag_accepts_only_daemon_modes() {
        assert_eq!(parse_mode("daemon"), Ok(Mode::Daemon));
        assert_eq!(parse_mode("MULTI_DAEMON"), Ok(Mode::MultiDaemon));
        assert!(parse_mode("quick").is_err());
        assert!(parse_mode("parallel").is_err());
    }

    #[test]
    fn args_become_a_request() {
        let args = AskArgs {
            message: "audit the repo".into(),
            model: Some("gpt-4o".into()),
            mode: Some(Mode::MultiDaemon),
            template: None,
            ollama: false,
        };
        let request = args.request();
        assert_eq!(request.user_id, LOCAL_USER);
        assert_eq!(request.model.as_deref(), Some("gpt-4o"));
        assert_eq!(request.mode, Some(Mode::MultiDaemon));
        assert!(request.template_slug.is_none());
    }
}
