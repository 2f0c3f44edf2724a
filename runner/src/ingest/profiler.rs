use super::{FieldError, RunTimings};
use once_cell::sync::Lazy;
use regex::Regex;

/// column header opening the inclusive-time table of the TinyProfiler summary
pub const INCLUSIVE_HEADER: &str = "NCalls  Incl. Min  Incl. Avg  Incl. Max   Max %";

// TinyProfiler total time across processes [min...avg...max]: 1.2 ... 1.3 ... 1.4
static TOTAL_TIME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"TinyProfiler total time across processes\s+\S+\s+(?P<min>\S+)\s+\S+\s+(?P<avg>\S+)\s+\S+\s+(?P<max>\S+)",
    )
    .expect("valid total time pattern")
});

/// Text layout of the profiler summary printed at the end of a run
#[derive(Debug, Clone)]
pub struct ProfilerFormat {
    // <marker>  <NCalls>  <Incl. Min>  <Incl. Avg>  <Incl. Max>  <Max %>
    region: Regex,
}

fn number(field: &'static str, value: &str) -> Result<f64, FieldError> {
    value.parse().map_err(|_| FieldError::InvalidNumber {
        field,
        value: value.to_owned(),
    })
}

impl ProfilerFormat {
    /// `loop_marker` is the profiler region of the main simulation loop, matched literally
    pub fn new(loop_marker: &str) -> Result<Self, regex::Error> {
        let region = Regex::new(&format!(
            r"(?m)^\s*{}\s+(?P<ncalls>\d+)\s+(?P<min>\S+)\s+(?P<avg>\S+)\s+(?P<max>\S+)",
            regex::escape(loop_marker.trim())
        ))?;

        Ok(Self { region })
    }

    /// total run time averaged over processes
    pub fn total_time(&self, text: &str) -> Result<f64, FieldError> {
        let captures = TOTAL_TIME
            .captures(text)
            .ok_or(FieldError::NotFound("total time"))?;

        number("total time", &captures["avg"])
    }

    /// inclusive time of the main loop averaged over processes
    /// Only the inclusive table is searched, the exclusive table lists the same region first
    pub fn loop_time(&self, text: &str) -> Result<f64, FieldError> {
        let (_, inclusive) = text
            .split_once(INCLUSIVE_HEADER)
            .ok_or(FieldError::NotFound("inclusive profiler table"))?;
        let captures = self
            .region
            .captures(inclusive)
            .ok_or(FieldError::NotFound("main loop time"))?;

        number("main loop time", &captures["avg"])
    }

    pub fn timings(&self, text: &str) -> Result<RunTimings, FieldError> {
        Ok(RunTimings {
            total: self.total_time(text)?,
            evolve: self.loop_time(text)?,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub const SAMPLE_OUTPUT: &str = "\
STEP 10 ends. TIME = 1.6e-13 DT = 1.6e-14
Walltime = 12.31 s; This step = 1.19 s; Avg. per step = 1.2 s

TinyProfiler total time across processes [min...avg...max]: 12.41 ... 12.5 ... 12.57

--------------------------------------------------------------------------------------------
Name                                          NCalls  Excl. Min  Excl. Avg  Excl. Max   Max %
--------------------------------------------------------------------------------------------
FabArray::ParallelCopy()                         120      3.104      3.201      3.322  26.43%
WarpX::Evolve()                                    1     0.0101     0.0112     0.0131   0.10%
--------------------------------------------------------------------------------------------

--------------------------------------------------------------------------------------------
Name                                          NCalls  Incl. Min  Incl. Avg  Incl. Max   Max %
--------------------------------------------------------------------------------------------
main()                                             1      12.41       12.5      12.57 100.00%
WarpX::Evolve()                                    1      11.93         12      12.08  96.11%
FabArray::ParallelCopy()                         120      3.104      3.201      3.322  26.43%
--------------------------------------------------------------------------------------------
";

    fn warpx() -> ProfilerFormat {
        ProfilerFormat::new("WarpX::Evolve()").unwrap()
    }

    #[test]
    fn total_time_is_the_average() {
        assert_eq!(warpx().total_time(SAMPLE_OUTPUT), Ok(12.5));
    }

    #[test]
    fn loop_time_from_inclusive_table() {
        assert_eq!(warpx().loop_time(SAMPLE_OUTPUT), Ok(12.0));
    }

    #[test]
    fn timings_derive_initialization_and_iteration() {
        let timings = warpx().timings(SAMPLE_OUTPUT).unwrap();

        assert_eq!(timings.initialization(), 0.5);
        assert_eq!(timings.per_iteration(10), 1.2);
    }

    #[test]
    fn other_loop_markers() {
        let format = ProfilerFormat::new("FabArray::ParallelCopy()").unwrap();

        assert_eq!(format.loop_time(SAMPLE_OUTPUT), Ok(3.201));
    }

    #[test]
    fn missing_inclusive_table() {
        let text = SAMPLE_OUTPUT.replace("Incl.", "Incl");

        assert_eq!(
            warpx().loop_time(&text),
            Err(FieldError::NotFound("inclusive profiler table"))
        );
    }

    #[test]
    fn missing_loop_region() {
        let text = SAMPLE_OUTPUT.replace("WarpX::Evolve()", "WarpX::Step()");

        assert_eq!(
            warpx().loop_time(&text),
            Err(FieldError::NotFound("main loop time"))
        );
    }

    #[test]
    fn missing_total_time() {
        let text = SAMPLE_OUTPUT.replace("TinyProfiler total time", "TinyProfiler time");

        assert_eq!(
            warpx().total_time(&text),
            Err(FieldError::NotFound("total time"))
        );
    }

    #[test]
    fn garbled_number() {
        let text = SAMPLE_OUTPUT.replace("12.41 ... 12.5 ...", "12.41 ... n/a ...");

        assert_eq!(
            warpx().total_time(&text),
            Err(FieldError::InvalidNumber {
                field: "total time",
                value: "n/a".to_owned()
            })
        );
    }
}
