fn main() {
    flatness_scan::cli::run();
}
