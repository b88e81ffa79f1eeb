use rand::Rng;
use rand::seq::SliceRandom;

/// Words offered to drawers when neither the owner nor the operator supplied a pool.
pub const DEFAULT_WORDS: &[&str] = &[
    "苹果", "香蕉", "西瓜", "草莓", "葡萄", "菠萝", "柠檬", "樱桃",
    "猫", "狗", "兔子", "熊猫", "长颈鹿", "大象", "企鹅", "老虎",
    "狮子", "猴子", "蝴蝶", "蜗牛", "螃蟹", "鲨鱼", "章鱼", "恐龙",
    "飞机", "火车", "自行车", "潜水艇", "热气球", "火箭", "轮船", "出租车",
    "雨伞", "眼镜", "手机", "电脑", "钢琴", "吉他", "闹钟", "台灯",
    "牙刷", "剪刀", "钥匙", "风筝", "气球", "蜡烛", "沙发", "冰箱",
    "太阳", "月亮", "彩虹", "雪人", "火山", "瀑布", "沙漠", "灯塔",
    "汉堡", "披萨", "饺子", "面条", "冰淇淋", "蛋糕", "爆米花", "寿司",
    "足球", "篮球", "滑板", "跳绳", "游泳", "钓鱼", "放风筝", "打雪仗",
    "医生", "警察", "厨师", "宇航员", "魔术师", "海盗", "忍者", "机器人",
];

/// Owner-supplied pools are capped so a single room cannot hold unbounded input.
pub const MAX_CUSTOM_WORDS: usize = 200;
pub const MAX_WORD_CHARS: usize = 32;

/// Trims, drops empties and duplicates. Returns `None` when the list breaks a limit.
pub fn sanitize_custom_words(raw: &[String]) -> Option<Vec<String>> {
    if raw.len() > MAX_CUSTOM_WORDS {
        return None;
    }
    let mut words: Vec<String> = Vec::with_capacity(raw.len());
    for word in raw {
        let trimmed = word.trim();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed.chars().count() > MAX_WORD_CHARS {
            return None;
        }
        if !words.iter().any(|w| w == trimmed) {
            words.push(trimmed.to_string());
        }
    }
    Some(words)
}

/// Samples up to `count` distinct words, in random order.
pub fn sample_words<R: Rng + ?Sized>(pool: &[String], count: usize, rng: &mut R) -> Vec<String> {
    pool.choose_multiple(rng, count.min(pool.len()))
        .cloned()
        .collect()
}

pub fn default_pool() -> Vec<String> {
    DEFAULT_WORDS.iter().map(|w| w.to_string()).collect()
}

/// Lowercases and keeps only ASCII alphanumerics and CJK ideographs, so
/// "Ice Cream!" and "icecream" compare equal.
pub fn normalize_text(text: &str) -> String {
    text.trim()
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || ('\u{4e00}'..='\u{9fff}').contains(c))
        .collect()
}

pub fn contains_answer(text: &str, answer: &str) -> bool {
    let answer = normalize_text(answer);
    if answer.is_empty() {
        return false;
    }
    normalize_text(text).contains(&answer)
}

/// Length mask shown to guessers: one underscore per character, spaces kept.
pub fn word_hint(word: &str) -> String {
    word.chars()
        .map(|c| if c.is_whitespace() { ' ' } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_normalize_strips_noise_but_keeps_cjk() {
        assert_eq!(normalize_text("  Ice Cream! "), "icecream");
        assert_eq!(normalize_text("是 长颈鹿？"), "是长颈鹿");
    }

    #[test]
    fn test_contains_answer_matches_inside_sentences() {
        assert!(contains_answer("我觉得是长颈鹿吧", "长颈鹿"));
        assert!(contains_answer("ICE-CREAM", "ice cream"));
        assert!(!contains_answer("长颈", "长颈鹿"));
        assert!(!contains_answer("anything", "!!!"));
    }

    #[test]
    fn test_word_hint_reveals_length_only() {
        assert_eq!(word_hint("熊猫"), "__");
        assert_eq!(word_hint("ice cream"), "___ _____");
    }

    #[test]
    fn test_sample_words_is_distinct_and_bounded() {
        let mut rng = StdRng::seed_from_u64(7);
        let pool = default_pool();
        let picked = sample_words(&pool, 3, &mut rng);
        assert_eq!(picked.len(), 3);
        assert_ne!(picked[0], picked[1]);
        assert_ne!(picked[1], picked[2]);

        let tiny = vec!["one".to_string()];
        assert_eq!(sample_words(&tiny, 3, &mut rng), vec!["one".to_string()]);
    }

    #[test]
    fn test_sanitize_custom_words() {
        let raw = vec![" 猫 ".to_string(), "".to_string(), "猫".to_string(), "狗".to_string()];
        assert_eq!(
            sanitize_custom_words(&raw),
            Some(vec!["猫".to_string(), "狗".to_string()])
        );

        let too_many: Vec<String> = (0..=MAX_CUSTOM_WORDS).map(|i| format!("w{i}")).collect();
        assert_eq!(sanitize_custom_words(&too_many), None);

        let too_long = vec!["x".repeat(MAX_WORD_CHARS + 1)];
        assert_eq!(sanitize_custom_words(&too_long), None);
    }
}
