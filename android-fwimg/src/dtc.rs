//! Device tree conversion through the `dtc` compiler.

use crate::error::Result;
use crate::exec::CommandRunner;
use std::path::Path;
use tracing::info;

const DTC: &str = "dtc";

fn arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Converts a binary device tree to source.
pub fn decompile(runner: &dyn CommandRunner, dtb: &Path, dts: &Path) -> Result<()> {
    let argv = [DTC, "-I", "dtb", "-O", "dts", "-o"]
        .into_iter()
        .map(String::from)
        .chain([arg(dts), arg(dtb)])
        .collect::<Vec<_>>();
    runner.execute(&argv)?.check(DTC)?;
    info!(dtb = %dtb.display(), dts = %dts.display(), "decompiled device tree");
    Ok(())
}

/// Compiles device tree source, keeping symbols for overlays.
pub fn compile(runner: &dyn CommandRunner, dts: &Path, dtb: &Path) -> Result<()> {
    let argv = [DTC, "-@", "-I", "dts", "-O", "dtb", "-o"]
        .into_iter()
        .map(String::from)
        .chain([arg(dtb), arg(dts)])
        .collect::<Vec<_>>();
    runner.execute(&argv)?.check(DTC)?;
    info!(dts = %dts.display(), dtb = %dtb.display(), "compiled device tree");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::exec::tests::FakeRunner;

    #[test]
    fn decompile_argv() {
        let runner = FakeRunner::default();
        decompile(&runner, Path::new("a.dtb"), Path::new("a.dts")).unwrap();
        assert_eq!(
            runner.calls(),
            vec![vec!["dtc", "-I", "dtb", "-O", "dts", "-o", "a.dts", "a.dtb"]]
        );
    }

    #[test]
    fn compile_argv() {
        let runner = FakeRunner::default();
        compile(&runner, Path::new("in.dts"), Path::new("out.dtb")).unwrap();
        assert_eq!(
            runner.calls(),
            vec![vec!["dtc", "-@", "-I", "dts", "-O", "dtb", "-o", "out.dtb", "in.dts"]]
        );
    }

    #[test]
    fn failure_carries_stderr() {
        let runner = FakeRunner::with_exit_codes(&[1]);
        let err = compile(&runner, Path::new("in.dts"), Path::new("out.dtb")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Tool);
        assert!(err.to_string().contains("boom"));
    }
}
