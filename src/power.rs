use rocket::serde::Deserialize;
use std::process::Command;
use std::time::Duration;

use crate::cloud_sync::run_with_timeout;

#[derive(Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum PowerCommand {
    On,
    Standby,
}

impl PowerCommand {
    fn cec_line(&self) -> &'static str {
        match self {
            PowerCommand::On => "on 0\n",
            PowerCommand::Standby => "standby 0\n",
        }
    }
}

/// Turning the panel on and off. An Err means the hardware path is
/// unavailable; it is recorded and never corrupts anything else.
pub trait PowerControl: Send + Sync {
    fn set_power(&self, command: PowerCommand) -> Result<(), String>;
    fn is_available(&self) -> bool;
}

/// Drives the TV over HDMI-CEC through cec-client.
pub struct CecPower;

impl PowerControl for CecPower {
    fn set_power(&self, command: PowerCommand) -> Result<(), String> {
        let mut cmd = Command::new("cec-client");
        cmd.arg("-s").arg("-d").arg("1");
        let output = run_with_timeout(
            cmd,
            Duration::from_secs(15),
            Some(command.cec_line().as_bytes()),
        )?;
        if output.status.success() {
            Ok(())
        } else {
            Err(format!(
                "cec-client exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ))
        }
    }

    fn is_available(&self) -> bool {
        let mut cmd = Command::new("cec-client");
        cmd.arg("-l");
        match run_with_timeout(cmd, Duration::from_secs(5), None) {
            Ok(output) => output.status.success(),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_deserialize_from_api_names() {
        let on: PowerCommand = serde_json::from_str(r#""on""#).unwrap();
        assert_eq!(PowerCommand::On, on);
        let standby: PowerCommand = serde_json::from_str(r#""standby""#).unwrap();
        assert_eq!(PowerCommand::Standby, standby);
        assert!(serde_json::from_str::<PowerCommand>(r#""reboot""#).is_err());
    }

    #[test]
    fn cec_lines_address_the_tv() {
        assert_eq!("on 0\n", PowerCommand::On.cec_line());
        assert_eq!("standby 0\n", PowerCommand::Standby.cec_line());
    }
}
