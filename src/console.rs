use ansi_term::Colour;
use anyhow::Result;
use rustyline::{error::ReadlineError, DefaultEditor};

use vmu_bridge::{
    framebuffer::is_lit, snapshot, Button, VmuBridge, MAX_VMU_COUNT, VMU_LCD_WIDTH,
};

#[derive(Debug, PartialEq, Eq)]
pub enum Command {
    Status,
    Show(usize),
    Press(usize, Button),
    Release(usize, Button),
    Enable,
    Disable,
    Connect(usize),
    Disconnect(usize),
    Snapshot(usize, String),
    Help,
    Quit,
    Nop,
}

const HELP: &str = "\
status                   list all slots
show <id>                draw the VMU screen
press <id> <button>      press mode|sleep|up|down|left|right|a|b
release <id> <button>    release a button
enable | disable         toggle the bridge
connect <id>             plug a VMU in
disconnect <id>          pull a VMU out
snapshot <id> <file>     save the screen as PNG
quit";

/// Interactive inspection of a running bridge.
pub struct Console {
    editor: DefaultEditor,
}

impl Console {
    pub fn new() -> Result<Self> {
        Ok(Self {
            editor: DefaultEditor::new()?,
        })
    }

    pub fn read_command(&mut self) -> Command {
        match self.editor.readline("vmu> ") {
            Ok(line) => {
                let _ = self.editor.add_history_entry(line.as_str());
                match parse_command(&line) {
                    Ok(command) => command,
                    Err(msg) => {
                        eprintln!("{}", msg);
                        Command::Nop
                    }
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("CTRL-C");
                Command::Quit
            }
            Err(ReadlineError::Eof) => {
                println!("CTRL-D");
                Command::Quit
            }
            Err(err) => {
                println!("Error: {:?}", err);
                Command::Quit
            }
        }
    }

    pub fn run(&mut self, bridge: &VmuBridge) {
        loop {
            match self.read_command() {
                Command::Quit => break,
                command => execute(bridge, command),
            }
        }
    }
}

fn parse_slot(arg: Option<&str>) -> Result<usize, String> {
    let arg = arg.ok_or("missing VMU id")?;
    arg.parse::<usize>()
        .map_err(|_| format!("invalid VMU id `{}`", arg))
}

fn parse_button(arg: Option<&str>) -> Result<Button, String> {
    arg.ok_or("missing button")?
        .parse::<Button>()
        .map_err(|e| e.to_string())
}

pub fn parse_command(line: &str) -> Result<Command, String> {
    let mut words = line.split_whitespace();
    let Some(cmd) = words.next() else {
        return Ok(Command::Nop);
    };

    let command = match cmd {
        "status" | "s" => Command::Status,
        "show" => Command::Show(parse_slot(words.next())?),
        "press" => Command::Press(parse_slot(words.next())?, parse_button(words.next())?),
        "release" => Command::Release(parse_slot(words.next())?, parse_button(words.next())?),
        "enable" => Command::Enable,
        "disable" => Command::Disable,
        "connect" => Command::Connect(parse_slot(words.next())?),
        "disconnect" => Command::Disconnect(parse_slot(words.next())?),
        "snapshot" => {
            let id = parse_slot(words.next())?;
            let path = words.next().ok_or("missing file name")?;
            Command::Snapshot(id, path.to_string())
        }
        "help" | "?" => Command::Help,
        "quit" | "q" => Command::Quit,
        _ => return Err(format!("Unknown command {}", line)),
    };
    Ok(command)
}

fn execute(bridge: &VmuBridge, command: Command) {
    match command {
        Command::Status => print_status(bridge),
        Command::Show(id) => match bridge.framebuffer(id) {
            Some(fb) => print_screen(&fb),
            None => println!("VMU {} is not active", id),
        },
        Command::Press(id, button) => bridge.send_button(id, button.into(), true),
        Command::Release(id, button) => bridge.send_button(id, button.into(), false),
        Command::Enable => bridge.set_enabled(true),
        Command::Disable => bridge.set_enabled(false),
        Command::Connect(id) => {
            if let Err(e) = bridge.on_connection_change(id, true) {
                eprintln!("{}", e);
            }
        }
        Command::Disconnect(id) => {
            if let Err(e) = bridge.on_connection_change(id, false) {
                eprintln!("{}", e);
            }
        }
        Command::Snapshot(id, path) => match bridge.framebuffer(id) {
            Some(fb) => match snapshot::write_png(&path, &fb, 4) {
                Ok(()) => println!("Saved VMU {} to {}", id, path),
                Err(e) => eprintln!("{:#}", e),
            },
            None => println!("VMU {} is not active", id),
        },
        Command::Help => println!("{}", HELP),
        Command::Quit | Command::Nop => (),
    }
}

fn print_status(bridge: &VmuBridge) {
    println!(
        "bridge {} / {}, {} VMU(s) connected",
        if bridge.is_initialized() {
            "initialized"
        } else {
            "terminated"
        },
        if bridge.is_enabled() {
            "enabled"
        } else {
            "disabled"
        },
        bridge.connected_count()
    );
    for id in 0..MAX_VMU_COUNT {
        if !bridge.is_active(id) {
            continue;
        }
        println!(
            "  VMU {} (port {}{}): last update {}ms, dirty={}, buttons={:?}",
            id,
            (b'A' + (id / 2) as u8) as char,
            id % 2 + 1,
            bridge.last_update(id),
            bridge.is_display_dirty(id),
            bridge.button_state(id)
        );
    }
}

fn print_screen(pixels: &[u32]) {
    let lit = Colour::Green.paint("█");
    let unlit = Colour::Fixed(22).paint("·");
    for row in pixels.chunks_exact(VMU_LCD_WIDTH) {
        let line: String = row
            .iter()
            .map(|px| if is_lit(*px) { lit.to_string() } else { unlit.to_string() })
            .collect();
        println!("{}", line);
    }
}
