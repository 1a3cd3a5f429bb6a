use bootsig_cli::args::InstallArgs;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    bootsig_cli::init_logging();
    let argv = std::env::args_os().map(|a| a.to_string_lossy().into_owned());
    let args = InstallArgs::parse_raw(argv).unwrap_or_else(|e| e.exit());
    let code = match bootsig_cli::signals::until_signal(bootsig_cli::commands::install::run_install(args)).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("bootsig-install: {e:#}");
            1
        }
    };
    std::process::exit(code);
}
