fn main() -> anyhow::Result<()> {
    taskgrid::run()
}
