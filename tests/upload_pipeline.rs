#![allow(missing_docs)]

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use stowage::{
    ExistingFile, FileError, Limits, NamingRule, RawUpload, RawUploadArrays, SavedFile,
    UploadError, UploadErrorCode, UploadFiles, Uploader,
};
use uuid::Uuid;

#[tokio::test]
async fn failing_file_in_batch_does_not_block_the_others() {
    let root = temp_root().await;
    let tmp = temp_root().await;
    let mut uploader = flat_uploader(&root);

    let files = UploadFiles::new()
        .single(
            "first",
            RawUpload::new("one.txt", write_tmp(&tmp, b"one").await, 3, "text/plain"),
        )
        .single(
            "second",
            RawUpload::new("", "", 0, "").with_error(4_i64),
        )
        .single(
            "third",
            RawUpload::new("three.txt", write_tmp(&tmp, b"three").await, 5, "text/plain"),
        );

    let result = uploader.upload(files).await.expect("two files should be saved");
    assert_eq!(result.len(), 2);
    assert!(result.contains_key("first"));
    assert!(!result.contains_key("second"));
    assert!(result.contains_key("third"));
    assert_eq!(uploader.last_error(), "没有文件被上传！");

    assert_eq!(result.rejected.len(), 1);
    assert_eq!(result.rejected[0].key, "second");
    assert_eq!(
        result.rejected[0].error,
        FileError::Transfer(UploadErrorCode::NoFile)
    );

    let third = result.get("third").expect("third saved");
    assert_eq!(third.ext, "txt");
    assert_eq!(third.key, "third");
    assert_eq!(
        tokio::fs::read(root.join(&third.save_path).join(&third.save_name))
            .await
            .expect("saved file readable"),
        b"three"
    );

    cleanup(root).await;
    cleanup(tmp).await;
}

#[tokio::test]
async fn digests_are_recorded_and_reproducible() {
    let root = temp_root().await;
    let tmp = temp_root().await;
    let mut uploader = flat_uploader(&root);

    let saved = uploader
        .upload_one(
            "doc",
            RawUpload::new("abc.txt", write_tmp(&tmp, b"abc").await, 3, "text/plain"),
        )
        .await
        .expect("upload should succeed");

    assert_eq!(saved.md5.as_deref(), Some("900150983cd24fb0d6963f7d28e17f72"));
    assert_eq!(
        saved.sha1.as_deref(),
        Some("a9993e364706816aba3e25717850c26c9cd0d89d")
    );

    let again = uploader
        .upload_one(
            "doc",
            RawUpload::new("abc.txt", write_tmp(&tmp, b"abc").await, 3, "text/plain"),
        )
        .await
        .expect("second upload should succeed");
    assert_eq!(saved.md5, again.md5);
    assert_eq!(saved.sha1, again.sha1);
    assert_ne!(saved.save_name, again.save_name);

    cleanup(root).await;
    cleanup(tmp).await;
}

#[tokio::test]
async fn hashing_can_be_disabled() {
    let root = temp_root().await;
    let tmp = temp_root().await;
    let mut uploader = Uploader::builder()
        .root_path(&root)
        .auto_sub(false)
        .hash(false)
        .build()
        .expect("uploader should build");

    let saved = uploader
        .upload_one(
            "doc",
            RawUpload::new("abc.txt", write_tmp(&tmp, b"abc").await, 3, "text/plain"),
        )
        .await
        .expect("upload should succeed");
    assert_eq!(saved.md5, None);
    assert_eq!(saved.sha1, None);

    cleanup(root).await;
    cleanup(tmp).await;
}

#[tokio::test]
async fn duplicate_names_are_refused_unless_replace_is_on() {
    let root = temp_root().await;
    let tmp = temp_root().await;
    let mut uploader = Uploader::builder()
        .root_path(&root)
        .auto_sub(false)
        .save_name(NamingRule::literal("fixed"))
        .build()
        .expect("uploader should build");

    let first = uploader
        .upload_one(
            "doc",
            RawUpload::new("a.txt", write_tmp(&tmp, b"first").await, 5, "text/plain"),
        )
        .await
        .expect("first upload should succeed");
    assert_eq!(first.save_name, "fixed.txt");

    let err = uploader
        .upload_one(
            "doc",
            RawUpload::new("b.txt", write_tmp(&tmp, b"second").await, 6, "text/plain"),
        )
        .await
        .expect_err("duplicate should be refused");
    assert!(matches!(err, UploadError::NothingSaved { .. }));
    assert_eq!(uploader.last_error(), "存在同名文件fixed.txt");
    assert_eq!(
        tokio::fs::read(root.join("fixed.txt")).await.expect("read"),
        b"first"
    );

    uploader.set_replace(true);
    uploader
        .upload_one(
            "doc",
            RawUpload::new("c.txt", write_tmp(&tmp, b"third").await, 5, "text/plain"),
        )
        .await
        .expect("replace should overwrite");
    assert_eq!(
        tokio::fs::read(root.join("fixed.txt")).await.expect("read"),
        b"third"
    );

    cleanup(root).await;
    cleanup(tmp).await;
}

#[tokio::test]
async fn limits_reject_with_their_messages() {
    let root = temp_root().await;
    let tmp = temp_root().await;
    let mut uploader = flat_uploader(&root);

    uploader.set_limits(Limits::new().with_max_size(3));
    let err = uploader
        .upload_one(
            "doc",
            RawUpload::new("big.txt", write_tmp(&tmp, b"12345").await, 5, "text/plain"),
        )
        .await
        .expect_err("size should be refused");
    assert_eq!(err.to_string(), "上传文件大小不符！");
    assert_eq!(uploader.last_error(), "上传文件大小不符！");

    uploader.set_limits(Limits::new().with_mimes(["image/*"]));
    uploader
        .upload_one(
            "doc",
            RawUpload::new("note.txt", write_tmp(&tmp, b"text").await, 4, "text/plain"),
        )
        .await
        .expect_err("mime should be refused");
    assert_eq!(uploader.last_error(), "上传文件MIME类型不允许！");

    uploader.set_limits(Limits::new().with_exts([".JPG", "png"]));
    uploader
        .upload_one(
            "doc",
            RawUpload::new("note.txt", write_tmp(&tmp, b"text").await, 4, "text/plain"),
        )
        .await
        .expect_err("extension should be refused");
    assert_eq!(uploader.last_error(), "上传文件后缀不允许");

    cleanup(root).await;
    cleanup(tmp).await;
}

#[tokio::test]
async fn sniffed_mime_replaces_the_declared_type() {
    let root = temp_root().await;
    let tmp = temp_root().await;
    let mut uploader = Uploader::builder()
        .root_path(&root)
        .auto_sub(false)
        .mimes(["image/png"])
        .build()
        .expect("uploader should build");

    let png = png_bytes(4, 3);
    let saved = uploader
        .upload_one(
            "avatar",
            RawUpload::new(
                "avatar.png",
                write_tmp(&tmp, &png).await,
                png.len() as u64,
                "application/octet-stream",
            ),
        )
        .await
        .expect("sniffed png should be accepted");
    assert_eq!(saved.content_type, "image/png");

    cleanup(root).await;
    cleanup(tmp).await;
}

#[tokio::test]
async fn image_extensions_require_a_valid_header() {
    let root = temp_root().await;
    let tmp = temp_root().await;
    let mut uploader = flat_uploader(&root);

    uploader
        .upload_one(
            "photo",
            RawUpload::new("photo.png", write_tmp(&tmp, b"not a png").await, 9, "image/png"),
        )
        .await
        .expect_err("fake png should be refused");
    assert_eq!(uploader.last_error(), "非法图像文件！");

    let swf = swf_bytes(120, 80);
    uploader
        .upload_one(
            "anim",
            RawUpload::new(
                "anim.gif",
                write_tmp(&tmp, &swf).await,
                swf.len() as u64,
                "image/gif",
            ),
        )
        .await
        .expect_err("gif without bit depth should be refused");
    assert_eq!(uploader.last_error(), "非法图像文件！");

    let saved = uploader
        .upload_one(
            "movie",
            RawUpload::new(
                "movie.swf",
                write_tmp(&tmp, &swf).await,
                swf.len() as u64,
                "application/x-shockwave-flash",
            ),
        )
        .await
        .expect("swf should pass under its own extension");
    assert_eq!(saved.ext, "swf");

    let png = png_bytes(2, 2);
    uploader
        .upload_one(
            "photo",
            RawUpload::new(
                "photo.PNG",
                write_tmp(&tmp, &png).await,
                png.len() as u64,
                "image/png",
            ),
        )
        .await
        .expect("real png should pass");

    cleanup(root).await;
    cleanup(tmp).await;
}

#[tokio::test]
async fn date_sub_directory_is_created_under_save_path() {
    let root = temp_root().await;
    let tmp = temp_root().await;
    let mut uploader = Uploader::builder()
        .root_path(&root)
        .save_path("docs")
        .sub_name(NamingRule::date("%Y-%m-%d"))
        .build()
        .expect("uploader should build");

    let saved = uploader
        .upload_one(
            "doc",
            RawUpload::new("a.txt", write_tmp(&tmp, b"dated").await, 5, "text/plain"),
        )
        .await
        .expect("upload should succeed");

    let today = chrono::Local::now().format("%Y-%m-%d").to_string();
    assert_eq!(saved.save_path, format!("docs/{today}/"));
    assert!(root.join("docs").join(&today).is_dir());
    assert!(root.join(&saved.save_path).join(&saved.save_name).is_file());

    cleanup(root).await;
    cleanup(tmp).await;
}

#[tokio::test]
async fn forced_save_extension_and_original_name_rule() {
    let root = temp_root().await;
    let tmp = temp_root().await;
    let mut uploader = Uploader::builder()
        .root_path(&root)
        .auto_sub(false)
        .save_name(NamingRule::Original)
        .save_ext(".dat")
        .build()
        .expect("uploader should build");

    let saved = uploader
        .upload_one(
            "doc",
            RawUpload::new("报告.txt", write_tmp(&tmp, b"data").await, 4, "text/plain"),
        )
        .await
        .expect("upload should succeed");
    assert_eq!(saved.save_name, "报告.dat");
    assert_eq!(saved.ext, "txt");

    let bare = uploader
        .upload_one(
            "doc",
            RawUpload::new("README", write_tmp(&tmp, b"readme").await, 6, "text/plain"),
        )
        .await
        .expect("upload should succeed");
    assert_eq!(bare.save_name, "README.dat");

    cleanup(root).await;
    cleanup(tmp).await;
}

#[tokio::test]
async fn configured_names_keep_their_punctuation() {
    let root = temp_root().await;
    let tmp = temp_root().await;
    let mut literal = Uploader::builder()
        .root_path(&root)
        .auto_sub(false)
        .save_name(NamingRule::literal("my(file)"))
        .build()
        .expect("uploader should build");

    let saved = literal
        .upload_one(
            "doc",
            RawUpload::new("a.txt", write_tmp(&tmp, b"a").await, 1, "text/plain"),
        )
        .await
        .expect("upload should succeed");
    assert_eq!(saved.save_name, "my(file).txt");
    assert!(root.join("my(file).txt").is_file());

    let mut original = Uploader::builder()
        .root_path(&root)
        .auto_sub(false)
        .save_name(NamingRule::Original)
        .build()
        .expect("uploader should build");

    let saved = original
        .upload_one(
            "doc",
            RawUpload::new("报告(1).pdf", write_tmp(&tmp, b"%PDF").await, 4, "application/pdf"),
        )
        .await
        .expect("upload should succeed");
    assert_eq!(saved.save_name, "报告(1).pdf");

    let saved = original
        .upload_one(
            "doc",
            RawUpload::new(".profile.txt", write_tmp(&tmp, b"p").await, 1, "text/plain"),
        )
        .await
        .expect("upload should succeed");
    assert_eq!(saved.save_name, "profile.txt");

    cleanup(root).await;
    cleanup(tmp).await;
}

#[tokio::test]
async fn multi_file_fields_are_keyed_by_index() {
    let root = temp_root().await;
    let tmp = temp_root().await;
    let mut uploader = flat_uploader(&root);

    let arrays: RawUploadArrays = vec![
        RawUpload::new("a.txt", write_tmp(&tmp, b"a").await, 1, "text/plain"),
        RawUpload::new("b.txt", write_tmp(&tmp, b"b").await, 1, "text/plain"),
    ]
    .into_iter()
    .collect();

    let result = uploader
        .upload(UploadFiles::new().multiple("photos", arrays))
        .await
        .expect("upload should succeed");

    let keys: Vec<&str> = result.iter().map(|(key, _)| key.as_str()).collect();
    assert_eq!(keys, vec!["photos.0", "photos.1"]);
    assert!(result.iter().all(|(_, file)| file.key == "photos"));

    cleanup(root).await;
    cleanup(tmp).await;
}

#[tokio::test]
async fn temp_files_must_be_genuine_uploads() {
    let root = temp_root().await;
    let tmp = temp_root().await;
    let elsewhere = temp_root().await;
    let mut uploader = Uploader::builder()
        .root_path(&root)
        .auto_sub(false)
        .upload_tmp_dir(&tmp)
        .build()
        .expect("uploader should build");

    uploader
        .upload_one(
            "doc",
            RawUpload::new("a.txt", tmp.join("missing"), 1, "text/plain"),
        )
        .await
        .expect_err("missing temp file should be refused");
    assert_eq!(uploader.last_error(), "非法上传文件！");

    uploader
        .upload_one(
            "doc",
            RawUpload::new("a.txt", write_tmp(&elsewhere, b"x").await, 1, "text/plain"),
        )
        .await
        .expect_err("temp file outside the upload dir should be refused");
    assert_eq!(uploader.last_error(), "非法上传文件！");

    uploader
        .upload_one(
            "doc",
            RawUpload::new("a.txt", write_tmp(&tmp, b"x").await, 1, "text/plain"),
        )
        .await
        .expect("temp file inside the upload dir should pass");

    cleanup(root).await;
    cleanup(tmp).await;
    cleanup(elsewhere).await;
}

#[tokio::test]
async fn default_uploader_refuses_files_outside_the_system_temp_dir() {
    let outside = PathBuf::from(env!("CARGO_TARGET_TMPDIR"))
        .join(format!("stowage-outside-{}", Uuid::new_v4()));
    tokio::fs::create_dir_all(&outside)
        .await
        .expect("create outside dir");
    let system_tmp = std::fs::canonicalize(std::env::temp_dir()).expect("system temp dir");
    if std::fs::canonicalize(&outside)
        .expect("outside dir")
        .starts_with(&system_tmp)
    {
        // target dir lives under the system temp dir; nothing lies outside it
        cleanup(outside).await;
        return;
    }

    let root = temp_root().await;
    let mut uploader = Uploader::builder()
        .root_path(&root)
        .auto_sub(false)
        .build()
        .expect("uploader should build");

    let stray = write_tmp(&outside, b"x").await;
    uploader
        .upload_one("doc", RawUpload::new("a.txt", &stray, 1, "text/plain"))
        .await
        .expect_err("file outside the system temp dir should be refused");
    assert_eq!(uploader.last_error(), "非法上传文件！");
    assert!(stray.exists(), "refused file stays in place");

    let mut permissive = Uploader::builder()
        .root_path(&root)
        .auto_sub(false)
        .allow_any_tmp_location()
        .build()
        .expect("uploader should build");
    permissive
        .upload_one("doc", RawUpload::new("a.txt", &stray, 1, "text/plain"))
        .await
        .expect("explicit opt-out accepts any regular file");

    cleanup(root).await;
    cleanup(outside).await;
}

#[tokio::test]
async fn unnamed_upload_is_an_unknown_error() {
    let root = temp_root().await;
    let tmp = temp_root().await;
    let mut uploader = flat_uploader(&root);

    let err = uploader
        .upload_one(
            "doc",
            RawUpload::new("", write_tmp(&tmp, b"x").await, 1, "text/plain"),
        )
        .await
        .expect_err("unnamed upload should be refused");
    let UploadError::NothingSaved { rejected } = err else {
        panic!("expected per-file rejection");
    };
    assert_eq!(rejected[0].error, FileError::MissingName);
    assert_eq!(uploader.last_error(), "未知上传错误！");

    cleanup(root).await;
    cleanup(tmp).await;
}

#[tokio::test]
async fn existing_copy_short_circuits_the_save() {
    let root = temp_root().await;
    let tmp = temp_root().await;
    let stored = root.join("already.txt");
    tokio::fs::write(&stored, b"abc").await.expect("write stored copy");

    let known = SavedFile {
        name: "old.txt".to_owned(),
        content_type: "text/plain".to_owned(),
        size: 3,
        ext: "txt".to_owned(),
        save_name: "already.txt".to_owned(),
        save_path: String::new(),
        md5: Some("900150983cd24fb0d6963f7d28e17f72".to_owned()),
        sha1: None,
        key: "doc".to_owned(),
    };
    let hook_record = ExistingFile {
        path: stored.clone(),
        file: known.clone(),
    };

    let mut uploader = Uploader::builder()
        .root_path(&root)
        .auto_sub(false)
        .on_existing(move |file| {
            let digests = file.digests.as_ref()?;
            (digests.md5 == "900150983cd24fb0d6963f7d28e17f72").then(|| hook_record.clone())
        })
        .build()
        .expect("uploader should build");

    let tmp_file = write_tmp(&tmp, b"abc").await;
    let saved = uploader
        .upload_one("doc", RawUpload::new("new.txt", &tmp_file, 3, "text/plain"))
        .await
        .expect("upload should succeed");
    assert_eq!(saved, known);
    assert!(tmp_file.exists(), "temp file should not be moved");

    cleanup(root).await;
    cleanup(tmp).await;
}

#[tokio::test]
async fn vanished_copy_is_trashed_and_saved_again() {
    let root = temp_root().await;
    let tmp = temp_root().await;
    let trashed = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&trashed);
    let gone = root.join("gone.txt");

    let mut uploader = Uploader::builder()
        .root_path(&root)
        .auto_sub(false)
        .on_existing(move |file| {
            Some(ExistingFile {
                path: gone.clone(),
                file: SavedFile {
                    name: file.name.clone(),
                    content_type: file.content_type.clone(),
                    size: file.size,
                    ext: file.ext.clone(),
                    save_name: "gone.txt".to_owned(),
                    save_path: String::new(),
                    md5: None,
                    sha1: None,
                    key: file.key.clone(),
                },
            })
        })
        .on_trash(move |existing| {
            assert_eq!(existing.file.save_name, "gone.txt");
            seen.fetch_add(1, Ordering::SeqCst);
        })
        .build()
        .expect("uploader should build");

    let saved = uploader
        .upload_one(
            "doc",
            RawUpload::new("a.txt", write_tmp(&tmp, b"fresh").await, 5, "text/plain"),
        )
        .await
        .expect("upload should succeed");

    assert_eq!(trashed.load(Ordering::SeqCst), 1);
    assert_ne!(saved.save_name, "gone.txt");
    assert!(root.join(&saved.save_name).is_file());

    cleanup(root).await;
    cleanup(tmp).await;
}

#[tokio::test]
async fn call_level_failures_set_last_error() {
    let root = temp_root().await;
    let mut uploader = flat_uploader(&root);

    let err = uploader
        .upload(UploadFiles::new())
        .await
        .expect_err("empty input should fail");
    assert_eq!(err, UploadError::NoFiles);
    assert_eq!(uploader.last_error(), "没有上传的文件！");

    let missing_root = root.join("does-not-exist");
    let mut orphan = flat_uploader(&missing_root);
    let err = orphan
        .upload(UploadFiles::new().single(
            "doc",
            RawUpload::new("a.txt", root.join("x"), 1, "text/plain"),
        ))
        .await
        .expect_err("missing root should fail");
    assert!(matches!(err, UploadError::RootPath(_)));
    assert!(orphan.last_error().starts_with("上传根目录不存在！"));

    tokio::fs::write(root.join("blocked"), b"x")
        .await
        .expect("write blocker");
    let tmp = write_tmp(&root, b"kept").await;
    let mut blocked = Uploader::builder()
        .root_path(&root)
        .save_path("blocked/inner")
        .build()
        .expect("uploader should build");
    let err = blocked
        .upload_one("doc", RawUpload::new("a.txt", &tmp, 4, "text/plain"))
        .await
        .expect_err("unusable save path should fail");
    assert!(matches!(err, UploadError::SavePath(_)));
    assert_eq!(blocked.last_error(), "目录 blocked/inner/ 创建失败！");
    assert!(tmp.exists(), "preflight failure leaves the temp file alone");

    cleanup(root).await;
}

fn flat_uploader(root: &Path) -> Uploader {
    Uploader::builder()
        .root_path(root)
        .auto_sub(false)
        .build()
        .expect("uploader should build")
}

fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let image = image::DynamicImage::ImageRgb8(image::RgbImage::new(width, height));
    let mut out = Cursor::new(Vec::new());
    image
        .write_to(&mut out, image::ImageFormat::Png)
        .expect("encode png");
    out.into_inner()
}

fn swf_bytes(width: i64, height: i64) -> Vec<u8> {
    const NBITS: u32 = 16;
    let mut bits = Vec::new();
    push_bits(&mut bits, u64::from(NBITS), 5);
    for value in [0, width * 20, 0, height * 20] {
        push_bits(&mut bits, value as u64, NBITS);
    }
    let mut rect = vec![0u8; bits.len().div_ceil(8)];
    for (index, bit) in bits.iter().enumerate() {
        if *bit {
            rect[index / 8] |= 0x80 >> (index % 8);
        }
    }

    let mut out = b"FWS".to_vec();
    out.push(10);
    let total = 8 + rect.len() + 4;
    out.extend_from_slice(&(total as u32).to_le_bytes());
    out.extend_from_slice(&rect);
    out.extend_from_slice(&[0, 24, 1, 0]);
    out
}

fn push_bits(bits: &mut Vec<bool>, value: u64, count: u32) {
    for shift in (0..count).rev() {
        bits.push((value >> shift) & 1 == 1);
    }
}

async fn write_tmp(dir: &Path, body: &[u8]) -> PathBuf {
    let path = dir.join(format!("upload-{}", Uuid::new_v4().simple()));
    tokio::fs::write(&path, body).await.expect("write temp file");
    path
}

async fn temp_root() -> PathBuf {
    let root = std::env::temp_dir().join(format!("stowage-test-{}", Uuid::new_v4()));
    tokio::fs::create_dir_all(&root).await.expect("create temp root");
    root
}

async fn cleanup(root: PathBuf) {
    let _ = tokio::fs::remove_dir_all(root).await;
}
