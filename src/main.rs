fn main() {
    speaking_test_lib::run()
}
