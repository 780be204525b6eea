use clap::Parser;

fn main() {
    let launch_time = std::time::SystemTime::now();
    let args = cubevis::app::CubevisArgs::parse();
    cubevis::app::init(&args, launch_time);

    if let Err(err) = cubevis::run(args) {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}
