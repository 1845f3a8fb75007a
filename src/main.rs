use shreplay::commands::{
    dump_command::DumpCommand,
    exit_result::ExitResult,
    info_command::InfoCommand,
    shreplay_options::{ShreplayOptions, ShreplaySubCommand},
    simulate_command::SimulateCommand,
    ShreplayCommand,
};
use structopt::StructOpt;

fn main() -> ExitResult<()> {
    let options = ShreplayOptions::from_args();
    match &options.cmd {
        ShreplaySubCommand::Info { .. } => InfoCommand::new(&options).run(),
        ShreplaySubCommand::Dump { .. } => DumpCommand::new(&options).run(),
        ShreplaySubCommand::Simulate { .. } => SimulateCommand::new(&options).run(),
    }
}
