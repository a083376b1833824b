fn main() {
    focuslapse_lib::run()
}
