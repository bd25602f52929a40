//! Interactive board configuration
//!
//! Walks the user through calibrating knobs, setting button modes and
//! enabling controllers on one board at a time, then writes the resulting
//! configuration frame to the bus.

use anyhow::Result;
use colored::*;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use thiserror::Error;

use crate::hardware::commands::{
    CalibrationPosition, BUTTON_MODE_SLOTS, CONTROLLER_COUNT, STEPPED_BUTTON,
};
use crate::hardware::{format_hex, open_serial, HardwareCommand, HardwareSink, SerialWriter};
use crate::params::registry::MAX_UNIT;

/// Mode byte shared by every button of the radio group
pub const RADIO_GROUP_MODE: u8 = 4;
pub const MIN_STEPS: u8 = 2;
pub const MAX_STEPS: u8 = 5;
/// Table slot holding "display zero" for the stepped button
pub const DISPLAY_ZERO_SLOT: usize = 6;
/// Table slot holding "display zero" for the radio group
pub const GROUP_DISPLAY_ZERO_SLOT: usize = 7;

/// The user closed the input (Ctrl-C / Ctrl-D)
#[derive(Debug, Error)]
#[error("configuration aborted")]
pub struct Aborted;

/// Source of answers for the configuration dialogue
pub trait Prompt {
    fn ask(&mut self, prompt: &str) -> Result<String>;
}

/// Line editor on the controlling terminal
pub struct TerminalPrompt {
    editor: DefaultEditor,
}

impl TerminalPrompt {
    pub fn new() -> Result<Self> {
        Ok(Self {
            editor: DefaultEditor::new()?,
        })
    }
}

impl Prompt for TerminalPrompt {
    fn ask(&mut self, prompt: &str) -> Result<String> {
        match self.editor.readline(prompt) {
            Ok(line) => Ok(line.trim().to_string()),
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => Err(Aborted.into()),
            Err(e) => Err(e.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Exit,
    Calibrate,
    ButtonModes,
    ControllerStates,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ButtonMode {
    #[default]
    Toggle = 0,
    Momentary = 1,
}

/// How buttons 2-5 behave
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonGroup {
    /// Exactly one of them is on at a time
    Radio { display_zero: bool },
    Individual([ButtonMode; 4]),
}

/// Everything the button mode table encodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ButtonModeConfig {
    pub button0: ButtonMode,
    /// Number of steps of the stepped button
    pub max_steps: u8,
    /// Whether the stepped button shows its zero step
    pub display_zero: bool,
    pub group: ButtonGroup,
}

impl Default for ButtonModeConfig {
    /// Factory settings of the boards
    fn default() -> Self {
        Self {
            button0: ButtonMode::Momentary,
            max_steps: MAX_STEPS,
            display_zero: true,
            group: ButtonGroup::Individual([ButtonMode::Momentary; 4]),
        }
    }
}

impl ButtonModeConfig {
    pub fn table(&self) -> [u8; BUTTON_MODE_SLOTS] {
        let mut modes = [0u8; BUTTON_MODE_SLOTS];
        modes[0] = self.button0 as u8;
        modes[STEPPED_BUTTON] = self.max_steps.clamp(MIN_STEPS, MAX_STEPS);
        modes[DISPLAY_ZERO_SLOT] = self.display_zero as u8;
        match self.group {
            ButtonGroup::Radio { display_zero } => {
                modes[2..6].fill(RADIO_GROUP_MODE);
                modes[GROUP_DISPLAY_ZERO_SLOT] = display_zero as u8;
            }
            ButtonGroup::Individual(buttons) => {
                for (slot, mode) in modes[2..6].iter_mut().zip(buttons) {
                    *slot = mode as u8;
                }
            }
        }
        modes
    }
}

/// One configuration change for one board
#[derive(Debug, Clone, PartialEq)]
pub enum BoardRequest {
    Calibrate(CalibrationPosition),
    ButtonModes(ButtonModeConfig),
    /// Which controllers are active
    ControllerStates([bool; CONTROLLER_COUNT]),
}

impl BoardRequest {
    pub fn command(&self, unit: u8) -> HardwareCommand {
        match self {
            BoardRequest::Calibrate(position) => HardwareCommand::Calibrate {
                unit,
                position: *position,
            },
            BoardRequest::ButtonModes(config) => HardwareCommand::ButtonModes {
                unit,
                modes: config.table(),
            },
            BoardRequest::ControllerStates(active) => HardwareCommand::ControllerStates {
                unit,
                states: active.map(u8::from),
            },
        }
    }
}

/// Open the serial port and run the dialogue until the user is done
pub async fn run(port: &str, baud_rate: u32) -> Result<()> {
    println!("{}", "**************************************".yellow());
    println!("{}", "*** RainPots Board Config Utility  ***".yellow().bold());
    println!("{}", "**************************************".yellow());
    println!();

    let writer = SerialWriter::new(open_serial(port, baud_rate)?);
    let mut prompt = TerminalPrompt::new()?;

    match session(&mut prompt, &writer).await {
        Err(e) if e.is::<Aborted>() => {
            println!();
            Ok(())
        }
        other => other,
    }
}

/// Configure boards until the user chooses to stop
pub async fn session(prompt: &mut dyn Prompt, hardware: &dyn HardwareSink) -> Result<()> {
    loop {
        let unit = ask_board(prompt)?;
        println!("\n{} {}\n", "Selected board:".yellow(), unit);

        let request = match ask_operation(prompt, unit)? {
            Operation::Exit => {
                println!("Exiting configuration tool");
                return Ok(());
            }
            Operation::Calibrate => BoardRequest::Calibrate(ask_calibration(prompt)?),
            Operation::ButtonModes => {
                let config = ask_button_modes(prompt)?;
                println!("Button modes: {:?}", config.table());
                BoardRequest::ButtonModes(config)
            }
            Operation::ControllerStates => {
                let active = ask_controller_states(prompt)?;
                println!("Controller states: {:?}", active.map(u8::from));
                BoardRequest::ControllerStates(active)
            }
        };

        let command = request.command(unit);
        println!("Sending configuration: {}", format_hex(&command.encode()));
        hardware.send(&command).await?;

        if !ask_yes_no(prompt, "Would you like to configure another board?", false)? {
            return Ok(());
        }
    }
}

fn invalid_choice() {
    println!("{}\n", "Invalid choice".red());
}

pub fn ask_board(prompt: &mut dyn Prompt) -> Result<u8> {
    loop {
        let answer = prompt.ask(&"Enter RainPot board index to configure: ".blue().to_string())?;
        match answer.parse::<u8>() {
            Ok(unit) if unit <= MAX_UNIT => return Ok(unit),
            _ => println!("{}", format!("Invalid board index (0-{})", MAX_UNIT).red()),
        }
    }
}

pub fn ask_operation(prompt: &mut dyn Prompt, unit: u8) -> Result<Operation> {
    loop {
        println!("{} {}:\n", "Choose operation for RainPot board".magenta(), unit);
        println!("[0] Exit");
        println!("[1] Calibrate Knobs");
        println!("[2] Set Button Modes");
        println!("[3] Activate/Deactivate Controllers");
        match prompt.ask(&"Operation: ".magenta().to_string())?.as_str() {
            "0" => return Ok(Operation::Exit),
            "1" => return Ok(Operation::Calibrate),
            "2" => return Ok(Operation::ButtonModes),
            "3" => return Ok(Operation::ControllerStates),
            _ => invalid_choice(),
        }
    }
}

pub fn ask_calibration(prompt: &mut dyn Prompt) -> Result<CalibrationPosition> {
    println!("{} Calibrate Knobs", "\nSelected operation:".yellow());
    println!(
        "{}\n",
        "Set all knobs to one position, then indicate which one it is.".yellow()
    );
    loop {
        println!("[1] Minimum Position");
        println!("[2] Center Position");
        println!("\tFor knobs WITH center detent.");
        println!("\tSet knobs WITHOUT center detent to minimum position.");
        println!("[3] Maximum Position");
        match prompt.ask(&"Position: ".magenta().to_string())?.as_str() {
            "1" => return Ok(CalibrationPosition::Min),
            "2" => return Ok(CalibrationPosition::Center),
            "3" => return Ok(CalibrationPosition::Max),
            _ => invalid_choice(),
        }
    }
}

/// Yes/no question; an empty answer takes `default`
pub fn ask_yes_no(prompt: &mut dyn Prompt, question: &str, default: bool) -> Result<bool> {
    let hint = if default { "[Y/n]" } else { "[y/N]" };
    loop {
        let answer = prompt.ask(&format!("{} {} ", question, hint))?;
        match answer.to_lowercase().as_str() {
            "" => return Ok(default),
            "y" | "yes" | "1" => return Ok(true),
            "n" | "no" | "0" => return Ok(false),
            _ => invalid_choice(),
        }
    }
}

fn ask_button_mode(prompt: &mut dyn Prompt, button: usize) -> Result<ButtonMode> {
    loop {
        println!("\n{} {}:", "Set mode for button".magenta(), button);
        println!("[0] Toggle (default)");
        println!("[1] Momentary");
        match prompt.ask(&"Button mode: ".magenta().to_string())?.as_str() {
            "" | "0" => return Ok(ButtonMode::Toggle),
            "1" => return Ok(ButtonMode::Momentary),
            _ => invalid_choice(),
        }
    }
}

fn ask_max_steps(prompt: &mut dyn Prompt) -> Result<u8> {
    loop {
        let answer = prompt.ask(&format!(
            "Set max steps for button {} [{}-{}] (default: {}) ",
            STEPPED_BUTTON, MIN_STEPS, MAX_STEPS, MAX_STEPS
        ))?;
        if answer.is_empty() {
            return Ok(MAX_STEPS);
        }
        match answer.parse::<u8>() {
            Ok(steps) if (MIN_STEPS..=MAX_STEPS).contains(&steps) => return Ok(steps),
            _ => invalid_choice(),
        }
    }
}

pub fn ask_button_modes(prompt: &mut dyn Prompt) -> Result<ButtonModeConfig> {
    println!("{} Set Button Modes", "\nSelected operation:".yellow());

    let button0 = ask_button_mode(prompt, 0)?;
    let max_steps = ask_max_steps(prompt)?;
    let display_zero = ask_yes_no(
        prompt,
        &format!("Display 0 (zero) for button {}?", STEPPED_BUTTON),
        true,
    )?;

    let group = if ask_yes_no(prompt, "Use buttons 2-5 as radio group?", false)? {
        ButtonGroup::Radio {
            display_zero: ask_yes_no(prompt, "Display 0 (zero) for radio group?", false)?,
        }
    } else {
        let mut buttons = [ButtonMode::Toggle; 4];
        for (i, mode) in buttons.iter_mut().enumerate() {
            *mode = ask_button_mode(prompt, i + 2)?;
        }
        ButtonGroup::Individual(buttons)
    };

    Ok(ButtonModeConfig {
        button0,
        max_steps,
        display_zero,
        group,
    })
}

pub fn ask_controller_states(prompt: &mut dyn Prompt) -> Result<[bool; CONTROLLER_COUNT]> {
    let mut active = [true; CONTROLLER_COUNT];
    for (controller, state) in active.iter_mut().enumerate() {
        let question = format!("Set controller {} active?", controller)
            .cyan()
            .to_string();
        *state = ask_yes_no(prompt, &question, true)?;
    }
    Ok(active)
}
