use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use super::action::{ActionError, ActionFields};

pub const ENV_PREFIX: &str = "TRIPWIRE_ALARM_";

/// Runs `command_line` through `sh -c` with the alarm fields exported as
/// `TRIPWIRE_ALARM_<FIELD>`. Output is discarded. A command still running
/// after `timeout` is killed.
pub async fn run_command(
    command_line: &str,
    fields: &ActionFields,
    timeout: Duration,
) -> Result<(), ActionError> {
    let mut command = Command::new("sh");
    command
        .arg("-c")
        .arg(command_line)
        .envs(
            fields
                .iter()
                .map(|(k, v)| (format!("{ENV_PREFIX}{}", k.to_ascii_uppercase()), v)),
        )
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    let status = tokio::time::timeout(timeout, command.status())
        .await
        .map_err(|_| ActionError::TimedOut(timeout))??;

    if status.success() {
        Ok(())
    } else {
        Err(ActionError::Exit(status.code()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fields_exported_to_environment() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.txt");
        let fields = ActionFields::from([("name", "disk".to_string()), ("state", "ok".to_string())]);

        run_command(
            &format!("printf '%s/%s' \"$TRIPWIRE_ALARM_NAME\" \"$TRIPWIRE_ALARM_STATE\" > {}", out.display()),
            &fields,
            Duration::from_secs(5),
        )
        .await
        .unwrap();

        assert_eq!(std::fs::read_to_string(out).unwrap(), "disk/ok");
    }

    #[tokio::test]
    async fn non_zero_exit_is_an_error() {
        let err = run_command("exit 3", &ActionFields::new(), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::Exit(Some(3))));
    }

    #[tokio::test]
    async fn hung_command_is_killed_at_timeout() {
        let started = std::time::Instant::now();
        let err = run_command("sleep 30", &ActionFields::new(), Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::TimedOut(_)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
