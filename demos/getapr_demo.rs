use log::Log;

struct SimpleLogger;

impl Log for SimpleLogger {
    fn enabled(&self, _: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        if self.enabled(record.metadata()) {
            println!("{} - {}", record.level(), record.args());
        }
    }

    fn flush(&self) {}
}

fn main() {
    log::set_max_level(log::LevelFilter::Info);
    log::set_logger(&SimpleLogger).unwrap();

    // Blocks through the first probe sweep.
    getapr::init(true).unwrap();

    let target = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "www.example.com".to_string());

    let pairs = getapr::get_addr_pairs(&target, 80).unwrap();
    if pairs.is_empty() {
        println!("no usable address pairs for {}", target);
    }
    for pair in pairs {
        println!("{:?}: bind {} connect {}", pair.family, pair.source, pair.destination);
    }

    println!("{:?}", getapr::status());
}
