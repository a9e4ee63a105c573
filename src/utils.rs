pub fn to_hex_str<T>(bytes: &T) -> String
where
    T: AsRef<[u8]> + ?Sized,
{
    let x = bytes.as_ref();

    x.iter()
        .map(|v| format!("{:02x}", v))
        .collect::<Vec<String>>()
        .join("")
}

pub trait IndentString {
    fn indent(&self, width: usize) -> String;
}

impl<T: AsRef<str> + ?Sized> IndentString for T {
    fn indent(&self, width: usize) -> String {
        let pad = " ".repeat(width);
        self.as_ref()
            .lines()
            .map(|line| format!("{}{}", pad, line))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
