use clap::Parser;

use bootsig_cli::args::HookArgs;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    bootsig_cli::init_logging();
    let args = HookArgs::parse();
    let code = match bootsig_cli::signals::until_signal(bootsig_cli::commands::hook::run_hook(args)).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("bootsig-hook: {e:#}");
            1
        }
    };
    std::process::exit(code);
}
