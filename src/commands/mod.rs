use exit_result::ExitResult;

pub mod dump_command;
pub mod exit_result;
pub mod info_command;
pub mod shreplay_options;
pub mod simulate_command;

pub trait ShreplayCommand {
    fn run(&mut self) -> ExitResult<()>;
}
