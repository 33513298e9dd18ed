use gumdrop::Options;
use httpmock::MockServer;
use std::io::{self, BufRead};

use flock::config::FlockConfiguration;
use flock::report::RunResult;
use flock::scenario::Scenario;
use flock::LoadTest;

/// Not all functions are used by all tests, so we enable allow(dead_code) to avoid
/// compiler warnings during testing.

/// The following options are configured by default, if not set to a custom value:
///  --host <mock-server>
///  --stages "2,300ms;2,700ms;0,300ms"
///  --think-time 50ms
///  --no-print-metrics
///  --quiet
pub fn build_configuration(server: &MockServer, custom: Vec<&str>) -> FlockConfiguration {
    // Start with an empty configuration.
    let mut configuration: Vec<&str> = vec![];
    // Declare server_url here no matter what, so its lifetime is sufficient when needed.
    let server_url = server.base_url();

    // Merge in all custom options first.
    configuration.extend_from_slice(&custom);

    // Default to using mock server if not otherwise configured.
    if !configuration.contains(&"--host") {
        configuration.extend_from_slice(&["--host", &server_url]);
    }

    // Default to a short ramp up, hold and ramp down.
    if !configuration.contains(&"--stages") {
        configuration.extend_from_slice(&["--stages", "2,300ms;2,700ms;0,300ms"]);
    }

    // Default to a short think time.
    if !configuration.contains(&"--think-time") {
        configuration.extend_from_slice(&["--think-time", "50ms"]);
    }

    // Keep test output readable.
    configuration.extend_from_slice(&["--no-print-metrics", "--quiet"]);

    // Parse these options to generate a FlockConfiguration.
    FlockConfiguration::parse_args_default(&configuration)
        .expect("failed to parse options and generate a configuration")
}

/// Create a LoadTest object from the configuration and scenario.
#[allow(dead_code)]
pub fn build_load_test(configuration: FlockConfiguration, scenario: Scenario) -> LoadTest {
    LoadTest::initialize_with_config(configuration)
        .unwrap()
        .register_scenario(scenario)
}

/// Run the actual load test, returning the RunResult.
pub fn run_load_test(load_test: LoadTest) -> RunResult {
    load_test.execute().unwrap()
}

/// Helper to count the number of lines in a test artifact.
#[allow(dead_code)]
pub fn file_length(file_name: &str) -> usize {
    if let Ok(file) = std::fs::File::open(std::path::Path::new(file_name)) {
        io::BufReader::new(file).lines().count()
    } else {
        0
    }
}

/// Helper to delete test artifacts, if existing.
#[allow(dead_code)]
pub fn cleanup_files(files: Vec<&str>) {
    for file in files {
        if std::path::Path::new(file).exists() {
            std::fs::remove_file(file).expect("failed to remove file");
        }
    }
}
