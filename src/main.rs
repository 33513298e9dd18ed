use flock::prelude::*;

fn main() -> Result<(), FlockError> {
    let result = LoadTest::initialize()?
        .register_scenario(flock::sentiment::scenario())
        .execute()?;

    // A failed threshold fails the run.
    if !result.passed() {
        std::process::exit(1);
    }

    Ok(())
}
