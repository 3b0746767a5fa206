fn main() {
    stashcam_lib::run()
}
