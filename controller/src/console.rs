use freezer_common::{ControlConfig, TemperatureProvider, ThermalState};

/// Target change per `up`/`down` press, same as the front-panel buttons.
pub const TARGET_STEP_C: f32 = 0.5;

pub const HELP: &str =
    "commands: status | target <celsius> | up | down | wifi on|off | ip | help | quit";

#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Status,
    SetTarget(f32),
    Step(f32),
    Network(bool),
    ShowIp,
    Help,
    Quit,
}

impl ConsoleCommand {
    pub fn parse(line: &str) -> Result<Self, String> {
        let mut words = line.split_whitespace();
        let Some(command) = words.next() else {
            return Ok(Self::Status);
        };
        let argument = words.next();

        match (command.to_ascii_lowercase().as_str(), argument) {
            ("status" | "s", None) => Ok(Self::Status),
            ("target" | "t", Some(value)) => value
                .parse::<f32>()
                .map(Self::SetTarget)
                .map_err(|_| format!("invalid temperature `{value}`")),
            ("up" | "+", None) => Ok(Self::Step(TARGET_STEP_C)),
            ("down" | "-", None) => Ok(Self::Step(-TARGET_STEP_C)),
            ("wifi", Some(state)) => match state.to_ascii_lowercase().as_str() {
                "on" | "connect" => Ok(Self::Network(true)),
                "off" | "disconnect" => Ok(Self::Network(false)),
                other => Err(format!("unknown wifi state `{other}`")),
            },
            ("ip", None) => Ok(Self::ShowIp),
            ("help" | "?", None) => Ok(Self::Help),
            ("quit" | "exit" | "q", None) => Ok(Self::Quit),
            _ => Err(format!("unrecognized command `{}`", line.trim())),
        }
    }
}

pub fn apply_target(
    provider: &dyn TemperatureProvider,
    control: &ControlConfig,
    target_c: f32,
) -> Result<f32, String> {
    if !control.accepts_target(target_c) {
        return Err(format!(
            "target must be between {:.1} and {:.1}",
            control.min_target_c, control.max_target_c
        ));
    }
    provider.set_target(target_c);
    Ok(target_c)
}

pub fn display_lines(provider: &dyn TemperatureProvider) -> [String; 2] {
    let readings = provider.snapshot();
    let state = ThermalState::from_readings(readings.current_c, readings.target_c);
    [
        format!("Temp: {:.1}C", readings.current_c),
        format!("Set: {:.1}C {}", readings.target_c, state.as_str()),
    ]
}
