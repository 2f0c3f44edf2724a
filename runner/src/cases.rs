use itertools::repeat_n;

/// how often every configuration is run to get some statistics
const REPETITIONS: usize = 3;

/// A single benchmark configuration
/// Identity is the position in the test list, it names the run directory of the case
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BenchmarkCase {
    /// input file below the source directory
    pub input: String,
    pub nodes: u32,
    /// MPI processes per node
    pub processes: u32,
    /// OpenMP threads per MPI process
    pub threads: u32,
}

impl BenchmarkCase {
    pub fn new(input: &str, nodes: u32, processes: u32, threads: u32) -> Self {
        Self {
            input: input.to_owned(),
            nodes,
            processes,
            threads,
        }
    }

    pub fn job_name(&self) -> String {
        format!(
            "{}{}{}{}",
            self.input, self.nodes, self.processes, self.threads
        )
    }

    /// number of MPI ranks over all nodes (`srun -n`)
    pub fn total_processes(&self) -> u32 {
        self.nodes * self.processes
    }
}

/// The fixed list of benchmarks, every item must finish within the wall-clock limit
/// of a single job.
pub fn test_list() -> Vec<BenchmarkCase> {
    [
        BenchmarkCase::new("uniform_plasma", 1, 8, 16),
        BenchmarkCase::new("uniform_plasma", 1, 4, 32),
        BenchmarkCase::new("uniform_plasma", 2, 4, 32),
    ]
    .into_iter()
    .flat_map(|case| repeat_n(case, REPETITIONS))
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_configuration_repeats() {
        let cases = test_list();

        assert_eq!(cases.len(), 9);
        assert!(cases[..3].iter().all(|case| case.processes == 8));
        assert_eq!(cases[6], BenchmarkCase::new("uniform_plasma", 2, 4, 32));
    }

    #[test]
    fn job_name_concatenates_layout() {
        let case = BenchmarkCase::new("uniform_plasma", 2, 4, 32);

        assert_eq!(case.job_name(), "uniform_plasma2432");
        assert_eq!(case.total_processes(), 8);
    }
}
