use anyhow::{Result, bail};

use crate::server::{NestRequest, NestResponse};

/// Send a single request and print the server's answer.
pub fn run(addr: Option<&str>, request: NestRequest) -> Result<()> {
    let response = super::call(addr, &request)?;
    if let NestResponse::Error { message } = &response {
        bail!("{message}");
    }
    println!("{}", describe(&response));
    Ok(())
}

fn describe(response: &NestResponse) -> String {
    match response {
        NestResponse::Environment { name, image } => format!("{name} ({image})"),
        NestResponse::Empty => "No live environment".to_string(),
        NestResponse::Persisted { version } => format!("Saved version {version}"),
        NestResponse::Discarded {
            saved_version,
            persist_error,
        } => match (saved_version, persist_error) {
            (Some(v), _) => format!("Discarded after saving version {v}"),
            (None, Some(err)) => format!("Discarded without saving: {err}"),
            (None, None) => "Discarded without saving".to_string(),
        },
        NestResponse::NoUser => "No such user".to_string(),
        NestResponse::NoLiveEnvironment => "No live environment".to_string(),
        NestResponse::Environments { entries } => format!("{} live environment(s)", entries.len()),
        NestResponse::Execution { output, has_heart } => {
            let heart = match has_heart {
                Some(true) => "beating",
                Some(false) => "missing",
                None => "unknown (instance not running)",
            };
            format!("{output}\nheartbeat: {heart}")
        }
        NestResponse::Trial { score } => format!("score: {score}"),
        NestResponse::Error { message } => format!("error: {message}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_discard() {
        let saved = NestResponse::Discarded {
            saved_version: Some(3),
            persist_error: None,
        };
        assert_eq!(describe(&saved), "Discarded after saving version 3");

        let failed = NestResponse::Discarded {
            saved_version: None,
            persist_error: Some("push rejected".to_string()),
        };
        assert_eq!(describe(&failed), "Discarded without saving: push rejected");
    }

    #[test]
    fn test_describe_execution_heartbeat() {
        let response = NestResponse::Execution {
            output: "hi".to_string(),
            has_heart: None,
        };
        assert!(describe(&response).ends_with("unknown (instance not running)"));
    }
}
