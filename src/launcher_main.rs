fn main() {
    match echelon_launcher::run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("echelon-launcher: {err:#}");
            std::process::exit(127);
        }
    }
}
