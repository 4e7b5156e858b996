fn main() {
    inbox_rules_lib::run()
}
