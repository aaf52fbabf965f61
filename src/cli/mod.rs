use std::path::PathBuf;

pub fn run_cli<I>(args: I) -> i32
where
    I: IntoIterator<Item = String>,
{
    let mut args = args.into_iter();
    let input = match args.next() {
        Some(arg) => arg,
        None => {
            print_usage();
            return 1;
        }
    };
    let mut output = None;
    while let Some(arg) = args.next() {
        if arg == "-o" {
            match args.next() {
                Some(path) => output = Some(PathBuf::from(path)),
                None => {
                    eprintln!("expected output after -o");
                    return 1;
                }
            }
        } else {
            eprintln!("unknown argument: {}", arg);
            return 1;
        }
    }
    let input_path = PathBuf::from(&input);
    let text = match crate::compile::compile_to_c(&input_path) {
        Ok(text) => text,
        Err(err) => {
            eprintln!("{}", err);
            return 1;
        }
    };
    let out_path = output.unwrap_or_else(|| {
        let mut os = input_path.clone().into_os_string();
        os.push(".c");
        PathBuf::from(os)
    });
    if let Err(err) = std::fs::write(&out_path, text) {
        eprintln!("failed to write {}: {}", out_path.display(), err);
        return 1;
    }
    0
}

fn print_usage() {
    eprintln!("usage: joyc <input.joy> [-o output.c]");
}

#[cfg(test)]
mod tests {
    use super::run_cli;
    use std::fs;
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_dir(prefix: &str) -> PathBuf {
        let nonce = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("time drift")
            .as_nanos();
        std::env::temp_dir().join(format!(
            "joyc-cli-{}-{}-{}",
            prefix,
            std::process::id(),
            nonce
        ))
    }

    #[test]
    fn writes_c_file_next_to_source() {
        let root = temp_dir("write");
        fs::create_dir_all(&root).expect("mkdir");
        let path = root.join("main.joy");
        fs::write(&path, "func main() { }").expect("write source");
        let code = run_cli(vec![path.display().to_string()]);
        assert_eq!(code, 0);
        let out = fs::read_to_string(root.join("main.joy.c")).expect("read output");
        assert!(out.contains("int main(void)"));
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn output_flag_overrides_destination() {
        let root = temp_dir("out-flag");
        fs::create_dir_all(&root).expect("mkdir");
        let path = root.join("main.joy");
        let out_path = root.join("custom.c");
        fs::write(&path, "func main() { }").expect("write source");
        let code = run_cli(vec![
            path.display().to_string(),
            "-o".to_string(),
            out_path.display().to_string(),
        ]);
        assert_eq!(code, 0);
        assert!(out_path.exists());
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn error_exit_code_on_bad_source() {
        let root = temp_dir("bad");
        fs::create_dir_all(&root).expect("mkdir");
        let path = root.join("main.joy");
        fs::write(&path, "func main() { f(1); }").expect("write source");
        let code = run_cli(vec![path.display().to_string()]);
        assert_eq!(code, 1);
        assert!(!root.join("main.joy.c").exists());
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn missing_argument_prints_usage() {
        assert_eq!(run_cli(Vec::new()), 1);
    }

    #[test]
    fn unknown_argument_is_rejected() {
        assert_eq!(
            run_cli(vec!["a.joy".to_string(), "--wat".to_string()]),
            1
        );
    }
}
