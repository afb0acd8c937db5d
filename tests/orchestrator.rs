//! Orchestrator tests against scripted stand-in engines.
//!
//! Each test writes small `/bin/sh` scripts that accept the same arguments
//! as LibreOffice and pdftoppm, then points the converter at them. That
//! covers every engine failure code without the real engines installed.

#![cfg(unix)]

use futures::future::join_all;
use parsekit_converter::{
    ConversionRequest, Converter, ConverterConfig, ConverterConfigBuilder, ErrorCode, ImageFormat, ImageOptions,
};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

// ── Test helpers ─────────────────────────────────────────────────────────────

/// Argument parsing shared by every fake office script: sets `$outdir`,
/// `$input` and `$stem`.
const OFFICE_ARGS: &str = r#"
outdir=""; input=""
while [ $# -gt 0 ]; do
  case "$1" in
    --outdir) outdir="$2"; shift 2 ;;
    *) input="$1"; shift ;;
  esac
done
name=$(basename "$input")
stem="${name%.*}"
"#;

/// Writes `%PDF-1.4` followed by the input bytes, so each output can be
/// traced back to its upload.
const OFFICE_CONVERT: &str = r#"{ printf '%%PDF-1.4\n'; cat "$input"; } > "$outdir/$stem.pdf""#;

/// Sets `$ext` from pdftoppm's format flag (`$1`).
const RENDER_EXT: &str = r#"
case "$1" in
  -png) ext=png ;;
  -jpeg) ext=jpg ;;
  -tiff) ext=tif ;;
  *) exit 99 ;;
esac
"#;

struct Harness {
    dir: tempfile::TempDir,
}

impl Harness {
    fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    fn workspace_root(&self) -> PathBuf {
        self.path().join("workspaces")
    }

    fn script(&self, name: &str, body: &str) -> String {
        let path = self.path().join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path.to_string_lossy().into_owned()
    }

    fn office(&self, body: &str) -> String {
        self.script("fake-office", &format!("{OFFICE_ARGS}\n{body}"))
    }

    fn renderer(&self, body: &str) -> String {
        self.script("fake-pdftoppm", &format!("{RENDER_EXT}\n{body}"))
    }

    fn builder(&self) -> ConverterConfigBuilder {
        ConverterConfig::builder()
            .workspace_root(self.workspace_root())
            .office_program(self.path().join("no-office-configured").to_string_lossy())
            .renderer_program(self.path().join("no-renderer-configured").to_string_lossy())
            .document_timeout(Duration::from_secs(10))
            .image_timeout(Duration::from_secs(10))
    }

    fn converter(&self, builder: ConverterConfigBuilder) -> Converter {
        Converter::new(builder.build().unwrap())
    }

    fn assert_no_workspaces(&self) {
        let leftovers: Vec<_> = match std::fs::read_dir(self.workspace_root()) {
            Ok(entries) => entries.flatten().map(|e| e.path()).collect(),
            Err(_) => Vec::new(),
        };
        assert!(leftovers.is_empty(), "workspaces left behind: {leftovers:?}");
    }
}

fn upload(name: &str, content: &[u8]) -> ConversionRequest {
    ConversionRequest::new(Some(name), content.to_vec(), None)
}

fn png_fixture(path: &Path) {
    let img = image::RgbaImage::from_pixel(8, 4, image::Rgba([0, 128, 255, 255]));
    img.save_with_format(path, image::ImageFormat::Png).unwrap();
}

/// `true` once `pid` is gone or a zombie awaiting reaping.
#[cfg(target_os = "linux")]
async fn wait_dead(pid: i32) -> bool {
    for _ in 0..40 {
        let dead = match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
            Err(_) => true,
            Ok(stat) => stat
                .rsplit(')')
                .next()
                .map(|rest| matches!(rest.trim_start().chars().next(), Some('Z') | Some('X')))
                .unwrap_or(false),
        };
        if dead {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

// ── Document conversion ──────────────────────────────────────────────────────

#[tokio::test]
async fn converts_with_office_engine() {
    let h = Harness::new();
    let office = h.office(OFFICE_CONVERT);
    let conv = h.converter(h.builder().office_program(office));

    let doc = conv
        .convert(upload("Quarterly Report.docx", b"docx-bytes"))
        .await
        .into_result()
        .unwrap();

    assert_eq!(doc.filename, "Quarterly Report.pdf");
    assert!(doc.converted);
    assert_eq!(doc.mime_type, "application/pdf");
    assert!(doc.content.starts_with(b"%PDF"));
    assert!(doc.content.ends_with(b"docx-bytes"));
    h.assert_no_workspaces();
}

#[tokio::test]
async fn hangul_filename_survives_conversion() {
    let h = Harness::new();
    let office = h.office(OFFICE_CONVERT);
    let conv = h.converter(h.builder().office_program(office));

    let doc = conv
        .convert(upload("사업계획서.hwp", b"hwp"))
        .await
        .into_result()
        .unwrap();
    assert_eq!(doc.filename, "사업계획서.pdf");
}

#[tokio::test]
async fn client_filenames_come_back_unchanged() {
    let h = Harness::new();
    let office = h.office(OFFICE_CONVERT);
    let conv = h.converter(h.builder().office_program(office));

    let doc = conv
        .convert(upload("$report.pdf", b"%PDF-1.4"))
        .await
        .into_result()
        .unwrap();
    assert_eq!(doc.filename, "$report.pdf");

    // Stored as `Q1 _ Q2.docx`; the response still uses the client's stem.
    let doc = conv
        .convert(upload("Q1 & Q2.docx", b"docx"))
        .await
        .into_result()
        .unwrap();
    assert_eq!(doc.filename, "Q1 & Q2.pdf");
    assert!(doc.content.ends_with(b"docx"));
    h.assert_no_workspaces();
}

#[tokio::test]
async fn office_failure_is_201() {
    let h = Harness::new();
    let office = h.office("echo 'Error: source file could not be loaded' >&2; exit 1");
    let conv = h.converter(h.builder().office_program(office));

    let failure = conv
        .convert(upload("broken.docx", b"garbage"))
        .await
        .into_result()
        .unwrap_err();
    assert_eq!(failure.code, ErrorCode::ConversionFailed);
    assert!(failure.message.contains("source file could not be loaded"), "{}", failure.message);
    h.assert_no_workspaces();
}

#[tokio::test]
async fn office_exiting_cleanly_without_output_is_202() {
    let h = Harness::new();
    let office = h.office("exit 0");
    let conv = h.converter(h.builder().office_program(office));

    let failure = conv
        .convert(upload("silent.pptx", b"pptx"))
        .await
        .into_result()
        .unwrap_err();
    assert_eq!(failure.code, ErrorCode::ConversionOutputNotFound);
    assert!(failure.message.contains("silent.pdf"), "{}", failure.message);
    h.assert_no_workspaces();
}

#[tokio::test]
async fn zero_byte_output_is_202() {
    let h = Harness::new();
    let office = h.office(r#": > "$outdir/$stem.pdf""#);
    let conv = h.converter(h.builder().office_program(office));

    let outcome = conv.convert(upload("empty-result.odt", b"odt")).await;
    assert_eq!(outcome.code(), ErrorCode::ConversionOutputNotFound);
}

#[tokio::test]
async fn office_timeout_is_203_and_engine_is_killed() {
    let h = Harness::new();
    let pid_file = h.path().join("office.pid");
    let office = h.office(&format!("echo $$ > '{}'\nexec sleep 30", pid_file.display()));
    let conv = h.converter(
        h.builder()
            .office_program(office)
            .document_timeout(Duration::from_millis(400)),
    );

    let started = std::time::Instant::now();
    let outcome = conv.convert(upload("slow.xlsx", b"xlsx")).await;
    assert_eq!(outcome.code(), ErrorCode::ConversionTimeout);
    assert!(started.elapsed() < Duration::from_secs(10));

    let pid: i32 = std::fs::read_to_string(&pid_file).unwrap().trim().parse().unwrap();
    assert_eq!(
        nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), None),
        Err(nix::errno::Errno::ESRCH),
        "office engine {pid} still exists after timeout"
    );
    h.assert_no_workspaces();
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn office_timeout_kills_forked_worker() {
    let h = Harness::new();
    let pid_file = h.path().join("worker.pid");
    // Launcher forks the real worker and waits on it, like soffice → soffice.bin.
    let office = h.office(&format!("sleep 30 &\necho $! > '{}'\nwait", pid_file.display()));
    let conv = h.converter(
        h.builder()
            .office_program(office)
            .document_timeout(Duration::from_millis(400)),
    );

    let outcome = conv.convert(upload("forking.doc", b"doc")).await;
    assert_eq!(outcome.code(), ErrorCode::ConversionTimeout);

    let worker: i32 = std::fs::read_to_string(&pid_file).unwrap().trim().parse().unwrap();
    assert!(wait_dead(worker).await, "worker {worker} survived the timeout");
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn dropped_conversion_kills_engine_and_cleans_up() {
    let h = Harness::new();
    let pid_file = h.path().join("office.pid");
    let office = h.office(&format!("echo $$ > '{}'\nexec sleep 30", pid_file.display()));
    let conv = h.converter(
        h.builder()
            .office_program(office)
            .document_timeout(Duration::from_secs(30)),
    );

    let cancelled =
        tokio::time::timeout(Duration::from_millis(500), conv.convert(upload("hang.docx", b"docx"))).await;
    assert!(cancelled.is_err(), "conversion should still have been running");

    let pid: i32 = std::fs::read_to_string(&pid_file).unwrap().trim().parse().unwrap();
    assert!(wait_dead(pid).await, "office engine {pid} survived cancellation");
    h.assert_no_workspaces();
    assert_eq!(conv.available_permits(), conv.config().max_concurrent_conversions);
}

#[tokio::test]
async fn missing_office_is_204() {
    let h = Harness::new();
    let conv = h.converter(h.builder());

    let outcome = conv.convert(upload("memo.docx", b"docx")).await;
    assert_eq!(outcome.code(), ErrorCode::LibreofficeNotFound);
    h.assert_no_workspaces();
}

#[tokio::test]
async fn empty_upload_is_101_and_creates_no_workspace() {
    let h = Harness::new();
    let office = h.office(OFFICE_CONVERT);
    let conv = h.converter(h.builder().office_program(office));

    let outcome = conv.convert(upload("memo.docx", b"")).await;
    assert_eq!(outcome.code(), ErrorCode::EmptyFile);
    assert!(!h.workspace_root().exists() || std::fs::read_dir(h.workspace_root()).unwrap().count() == 0);
}

#[tokio::test]
async fn pass_through_is_byte_identical() {
    let h = Harness::new();
    let conv = h.converter(h.builder());

    let pdf = b"%PDF-1.7\n%\xE2\xE3\xCF\xD3\n1 0 obj".to_vec();
    let doc = conv
        .convert(upload("scan.PDF", &pdf))
        .await
        .into_result()
        .unwrap();
    assert_eq!(doc.content, pdf);
    assert_eq!(doc.filename, "scan.PDF");
    assert!(!doc.converted);

    let png = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
    let img = conv
        .convert(upload("diagram.png", &png))
        .await
        .into_result()
        .unwrap();
    assert_eq!(img.content, png);
    assert_eq!(img.mime_type, "image/png");
}

#[tokio::test]
async fn concurrent_conversions_do_not_mix() {
    let h = Harness::new();
    let office = h.office(OFFICE_CONVERT);
    let conv = h.converter(h.builder().office_program(office).max_concurrent_conversions(4));

    let jobs = (0..10).map(|i| {
        let conv = conv.clone();
        async move {
            let marker = format!("payload-{i:02}");
            let doc = conv
                .convert(upload("same-name.docx", marker.as_bytes()))
                .await
                .into_result()
                .unwrap();
            (marker, doc)
        }
    });

    for (marker, doc) in join_all(jobs).await {
        assert_eq!(doc.filename, "same-name.pdf");
        assert!(doc.content.ends_with(marker.as_bytes()), "output mixed up for {marker}");
    }
    assert_eq!(conv.available_permits(), 4);
    h.assert_no_workspaces();
}

#[tokio::test]
async fn engine_runs_respect_concurrency_cap() {
    let h = Harness::new();
    let active = h.path().join("active");
    let log = h.path().join("counts.log");
    std::fs::create_dir(&active).unwrap();
    let office = h.office(&format!(
        "mkdir '{active}/'$$\nls '{active}' | wc -l >> '{log}'\nsleep 0.2\nrmdir '{active}/'$$\n{OFFICE_CONVERT}",
        active = active.display(),
        log = log.display(),
    ));
    let conv = h.converter(h.builder().office_program(office).max_concurrent_conversions(2));

    let jobs = (0..6).map(|i| {
        let conv = conv.clone();
        async move { conv.convert(upload(&format!("doc{i}.docx"), b"x")).await }
    });
    for outcome in join_all(jobs).await {
        assert!(outcome.is_success());
    }

    let max_seen = std::fs::read_to_string(&log)
        .unwrap()
        .lines()
        .filter_map(|l| l.trim().parse::<usize>().ok())
        .max()
        .unwrap();
    assert!(max_seen <= 2, "saw {max_seen} engines running at once");
}

// ── Page rendering ───────────────────────────────────────────────────────────

#[tokio::test]
async fn renders_pdf_pages_in_numeric_order() {
    let h = Harness::new();
    let renderer = h.renderer(
        r#"i=1
while [ $i -le 10 ]; do
  n=$(printf '%02d' $i)
  printf 'page %s' "$n" > "$5-$n.$ext"
  i=$((i+1))
done"#,
    );
    let conv = h.converter(h.builder().renderer_program(renderer));

    let images = conv
        .convert_to_images(upload("book.pdf", b"%PDF"), ImageOptions::default())
        .await
        .into_result()
        .unwrap();

    assert_eq!(images.total_pages(), 10);
    assert_eq!(images.mime_type, "image/png");
    for (i, page) in images.pages.iter().enumerate() {
        assert_eq!(page.page, i + 1);
        assert_eq!(page.content, format!("page {:02}", i + 1).into_bytes());
    }
    h.assert_no_workspaces();
}

#[tokio::test]
async fn jpeg_flag_and_dpi_reach_the_renderer() {
    let h = Harness::new();
    let args_file = h.path().join("args");
    let renderer = h.renderer(&format!(
        "echo \"$1 $2 $3\" > '{}'\nprintf jpg > \"$5-1.$ext\"",
        args_file.display()
    ));
    let conv = h.converter(h.builder().renderer_program(renderer));

    let options = ImageOptions {
        format: ImageFormat::Jpeg,
        dpi: 300,
    };
    let images = conv
        .convert_to_images(upload("a.pdf", b"%PDF"), options)
        .await
        .into_result()
        .unwrap();
    assert_eq!(images.mime_type, "image/jpeg");
    assert_eq!(std::fs::read_to_string(&args_file).unwrap().trim(), "-jpeg -r 300");
}

#[tokio::test]
async fn webp_pages_are_transcoded() {
    let h = Harness::new();
    let fixture = h.path().join("fixture.png");
    png_fixture(&fixture);
    let renderer = h.renderer(&format!(
        "cp '{f}' \"$5-1.$ext\"\ncp '{f}' \"$5-2.$ext\"",
        f = fixture.display()
    ));
    let conv = h.converter(h.builder().renderer_program(renderer));

    let options = ImageOptions {
        format: ImageFormat::Webp,
        dpi: 150,
    };
    let images = conv
        .convert_to_images(upload("slides.pdf", b"%PDF"), options)
        .await
        .into_result()
        .unwrap();

    assert_eq!(images.mime_type, "image/webp");
    assert_eq!(images.total_pages(), 2);
    for page in &images.pages {
        assert_eq!(&page.content[8..12], b"WEBP");
        let decoded = image::load_from_memory(&page.content).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (8, 4));
    }
}

#[tokio::test]
async fn office_documents_render_through_both_engines() {
    let h = Harness::new();
    let office = h.office(OFFICE_CONVERT);
    // Fails unless handed the non-empty PDF the office engine produced.
    let renderer = h.renderer(
        r#"case "$4" in *.pdf) ;; *) exit 7 ;; esac
[ -s "$4" ] || exit 8
cp "$4" "$5-1.$ext""#,
    );
    let conv = h.converter(h.builder().office_program(office).renderer_program(renderer));

    let images = conv
        .convert_to_images(upload("deck.pptx", b"pptx-bytes"), ImageOptions::default())
        .await
        .into_result()
        .unwrap();
    assert_eq!(images.total_pages(), 1);
    assert!(images.pages[0].content.ends_with(b"pptx-bytes"));
    h.assert_no_workspaces();
}

#[tokio::test]
async fn renderer_failure_is_301() {
    let h = Harness::new();
    let renderer = h.renderer("echo 'Syntax Error: Couldn'\\''t read xref table' >&2\nexit 1");
    let conv = h.converter(h.builder().renderer_program(renderer));

    let outcome = conv
        .convert_to_images(upload("corrupt.pdf", b"%PDF"), ImageOptions::default())
        .await;
    assert_eq!(outcome.code(), ErrorCode::ImageConversionFailed);
    h.assert_no_workspaces();
}

#[tokio::test]
async fn renderer_without_pages_is_301() {
    let h = Harness::new();
    let renderer = h.renderer("exit 0");
    let conv = h.converter(h.builder().renderer_program(renderer));

    let outcome = conv
        .convert_to_images(upload("blank.pdf", b"%PDF"), ImageOptions::default())
        .await;
    assert_eq!(outcome.code(), ErrorCode::ImageConversionFailed);
}

#[tokio::test]
async fn renderer_timeout_is_301() {
    let h = Harness::new();
    let renderer = h.renderer("exec sleep 30");
    let conv = h.converter(
        h.builder()
            .renderer_program(renderer)
            .image_timeout(Duration::from_millis(300)),
    );

    let outcome = conv
        .convert_to_images(upload("huge.pdf", b"%PDF"), ImageOptions::default())
        .await;
    assert_eq!(outcome.code(), ErrorCode::ImageConversionFailed);
    h.assert_no_workspaces();
}

#[tokio::test]
async fn missing_renderer_is_302() {
    let h = Harness::new();
    let conv = h.converter(h.builder());

    let outcome = conv
        .convert_to_images(upload("scan.pdf", b"%PDF"), ImageOptions::default())
        .await;
    assert_eq!(outcome.code(), ErrorCode::PopplerNotFound);
    h.assert_no_workspaces();
}

#[tokio::test]
async fn office_failure_stops_before_rendering() {
    let h = Harness::new();
    let rendered = h.path().join("renderer-ran");
    let office = h.office("exit 2");
    let renderer = h.renderer(&format!("touch '{}'", rendered.display()));
    let conv = h.converter(h.builder().office_program(office).renderer_program(renderer));

    let outcome = conv
        .convert_to_images(upload("bad.docx", b"docx"), ImageOptions::default())
        .await;
    assert_eq!(outcome.code(), ErrorCode::ConversionFailed);
    assert!(!rendered.exists());
}
