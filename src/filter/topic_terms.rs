use crate::filter::TopicCategory;

/// Weight of terms that on their own put a message close to the threshold.
pub const PRIMARY_WEIGHT: f64 = 3.0;
/// Weight of supporting context terms.
pub const SECONDARY_WEIGHT: f64 = 1.0;
/// Weight of off-topic terms (entertainment, sports, weather, ads).
pub const OFF_TOPIC_WEIGHT: f64 = -2.0;

/// Built-in dictionary used when no term file is configured.
///
/// **Order matters**: categories are declared war → geopolitical → economic,
/// and the first declared category wins a tie on cumulative weight.
///
/// Each group carries **both Persian (FA) and English (EN)** phrases.
///
/// Off-topic dampeners are filed under geopolitical, the broadest category,
/// so a hit pulls a post away from it rather than from war or economic.
pub const DEFAULT_TERMS: &[(TopicCategory, f64, &[&str])] = &[
    // ── War / direct military action ───────────────────────────────────
    (
        TopicCategory::War,
        PRIMARY_WEIGHT,
        &[
            // FA
            "جنگ",
            "حمله",
            "بمباران",
            "موشک",
            "درگیری",
            "عملیات نظامی",
            "حمله هوایی",
            "پهپاد",
            "حماس",
            "حزب‌الله",
            "حوثی",
            // EN ("war" alone would also hit "toward", "warning", …)
            "invasion",
            "attack",
            "airstrike",
            "air strike",
            "bombing",
            "missile",
            "military operation",
            "drone attack",
            "ceasefire",
            "strike",
            "conflict",
            "hamas",
            "hezbollah",
            "houthi",
        ],
    ),
    (
        TopicCategory::War,
        SECONDARY_WEIGHT,
        &[
            // FA
            "سپاه",
            "ارتش",
            "پدافند",
            "دفاع هوایی",
            "جنگنده",
            "نیروهای مسلح",
            // EN
            "army",
            "air defense",
            "fighter jet",
            "military forces",
            "irgc",
        ],
    ),
    // ── Geopolitics / nuclear / diplomacy ──────────────────────────────
    (
        TopicCategory::Geopolitical,
        PRIMARY_WEIGHT,
        &[
            // FA
            "اسرائیل",
            "هسته‌ای",
            "اورانیوم",
            "غنی‌سازی",
            "برجام",
            "آژانس اتمی",
            "تنگه هرمز",
            "نتانیاهو",
            "رهبر انقلاب",
            "نطنز",
            "غزه",
            "لبنان",
            "سوریه",
            "عراق",
            "یمن",
            "دریای سرخ",
            "کانال سوئز",
            "تنش",
            "بحران",
            // EN
            "israel",
            "nuclear",
            "uranium",
            "enrichment",
            "jcpoa",
            "iaea",
            "strait of hormuz",
            "netanyahu",
            "khamenei",
            "natanz",
            "gaza",
            "lebanon",
            "syria",
            "iraq",
            "yemen",
            "suez canal",
            "crisis",
            "tension",
        ],
    ),
    (
        TopicCategory::Geopolitical,
        SECONDARY_WEIGHT,
        &[
            // FA
            "ایران",
            "آمریکا",
            "روسیه",
            "چین",
            "شورای امنیت",
            "سازمان ملل",
            "مذاکرات",
            "خلیج فارس",
            "عربستان",
            "امارات",
            "مصر",
            "ترکیه",
            "ناتو",
            "اتحادیه اروپا",
            "دیپلماسی",
            "توافق",
            // EN
            "iran",
            "russia",
            "china",
            "nato",
            "security council",
            "united nations",
            "negotiations",
            "persian gulf",
            "red sea",
            "america",
            "saudi",
            "egypt",
            "turkey",
            "european union",
            "diplomacy",
            "agreement",
            "condemnation",
        ],
    ),
    // ── Economic warfare ───────────────────────────────────────────────
    (
        TopicCategory::Economic,
        PRIMARY_WEIGHT,
        &[
            // FA
            "تحریم",
            "تحریم نفتی",
            "تحریم بانکی",
            "فشار اقتصادی",
            "تحریم‌های جدید",
            "رفع تحریم",
            // EN
            "sanctions",
            "oil sanctions",
            "banking sanctions",
            "economic pressure",
            "economic warfare",
            "embargo",
            "oil",
        ],
    ),
    (
        TopicCategory::Economic,
        SECONDARY_WEIGHT,
        &[
            // FA
            "دلار",
            "طلا",
            "نفت",
            "قیمت نفت",
            "بازار ارز",
            "تورم",
            "اونس",
            "بورس",
            "اقتصاد جهانی",
            // EN
            "dollar",
            "gold",
            "crude",
            "oil price",
            "currency market",
            "inflation",
            "opec",
            "gold market",
            "global economy",
        ],
    ),
    // ── Off-topic dampeners ────────────────────────────────────────────
    // No "فیلم"/"footage", "تلویزیون"/"state TV" or "hospital": war reports
    // carry them all the time.
    (
        TopicCategory::Geopolitical,
        OFF_TOPIC_WEIGHT,
        &[
            // FA
            "سینما",
            "موسیقی",
            "هنرمند",
            "بازیگر",
            "خواننده",
            "کنسرت",
            "جشنواره",
            "سریال",
            "فوتبال",
            "والیبال",
            "بسکتبال",
            "ورزش",
            "بازیکن",
            "تیم ملی",
            "جام جهانی",
            "المپیک",
            "قهرمانی",
            "آب و هوا",
            "هواشناسی",
            "ترافیک",
            "تصادف",
            "زلزله",
            "تبلیغات",
            "تخفیف",
            "رستوران",
            "هتل",
            "اینستاگرام",
            // EN ("actor" would hit "reactor", "rental" would hit "parental")
            "cinema",
            "movie",
            "music",
            "artist",
            "singer",
            "festival",
            "football",
            "soccer",
            "volleyball",
            "sports",
            "world cup",
            "olympics",
            "championship",
            "weather",
            "forecast",
            "temperature",
            "accident",
            "flood",
            "earthquake",
            "advertisement",
            "discount",
            "restaurant",
            "cafe",
            "hotel",
            "real estate",
            "hiring",
            "instagram",
            "samsung",
            "vaccine",
        ],
    ),
];
