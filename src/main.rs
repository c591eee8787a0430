use clap::{Arg, Command};
use symcall::{logger, ImageHandle};

fn main() {
    let matches = Command::new("symdump")
        .version("0.1.0")
        .about("Dumps defined symbols from a native binary image")
        .arg(
            Arg::new("image")
                .required(true)
                .value_name("PATH")
                .help("Path to the binary image"),
        )
        .arg(
            Arg::new("resolve")
                .short('r')
                .long("resolve")
                .num_args(1)
                .value_name("NAME")
                .help("Resolve one symbol and print its address, arity and length"),
        )
        .arg(
            Arg::new("log-file")
                .short('l')
                .long("log-file")
                .num_args(1)
                .value_name("FILE")
                .help("Sets the log file path (appends to existing file)"),
        )
        .get_matches();

    let log_file: Option<String> = matches.get_one("log-file").map(|s: &String| s.to_string());
    logger::init_log(log_file.as_deref());

    // clap enforces the required positional; an empty path just loads
    // as a degraded handle with zero symbols.
    let path: String = matches
        .get_one::<String>("image")
        .cloned()
        .unwrap_or_default();
    let mut image = ImageHandle::load(&path);

    println!("Found {} symbols...", image.symbol_count());
    for index in 0..image.symbol_count() {
        if let Some((name, address)) = image.symbol(index) {
            println!("{:#018x} {}", address, name);
        }
    }

    if let Some(name) = matches.get_one::<String>("resolve") {
        let descriptor = image.create_function(name);
        if descriptor.address == 0 {
            println!("{}: not found", name);
        } else {
            let length = image.symbols().estimate_length(descriptor.address);
            println!(
                "{}: address {:#x}, {} argument(s), at most {:#x} bytes",
                name, descriptor.address, descriptor.arg_count, length
            );
        }
    }
}
