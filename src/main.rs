use shape_exercises::run;

pub fn main() -> anyhow::Result<()> {
    run()
}
