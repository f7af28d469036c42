use isolate::cli::{parse_args, Invocation};
use isolate::config::Config;
use isolate::error::or_die;
use isolate::orchestrator::launch;

fn main() {
    env_logger::init();

    match parse_args(std::env::args()) {
        Invocation::Nothing => {
            println!("Nothing to do!");
        }
        Invocation::Run(command) => {
            let config = Config::from_env();
            or_die("launch failed", launch(&config, &command));
        }
    }
}
