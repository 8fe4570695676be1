//! Seed data: the built-in problem set, demo leaderboard rows, and the canned
//! explanations served by the offline assistant.

use crate::domain::Problem;

/// Built-in duel problems. Overridable via `[[problems]]` in the TOML config.
pub fn dsa_problems() -> Vec<Problem> {
  vec![
    Problem {
      id: 1,
      title: "Reverse a String".into(),
      description: "Write a function to reverse a string without using built-in methods.".into(),
      difficulty: "Easy".into(),
    },
    Problem {
      id: 2,
      title: "Check for Palindrome".into(),
      description: "Determine if a given string is a palindrome.".into(),
      difficulty: "Easy".into(),
    },
    Problem {
      id: 3,
      title: "Find Max Element".into(),
      description: "Find the maximum number in a given array of integers.".into(),
      difficulty: "Medium".into(),
    },
  ]
}

/// (user id, display name, points) rows so a fresh leaderboard is not empty.
pub fn seed_leaderboard() -> Vec<(&'static str, &'static str, i64)> {
  vec![
    ("seed-alice", "Alice", 1250),
    ("seed-bob", "Bob", 1100),
    ("seed-charlie", "Charlie", 950),
    ("seed-diana", "Diana", 880),
  ]
}

/// Tone labels offered by the UI.
pub const STYLES: [&str; 5] = [
  "Explain me like I'm five",
  "Explain me in a fun way",
  "Explain me with examples",
  "Explain me in a story",
  "Explain me in an interactive way",
];

/// Hand-written answers for the offline assistant, keyed by lowercase topic then style.
pub fn canned_explanation(topic: &str, style: &str) -> Option<&'static str> {
  let answer = match (topic, style) {
    ("arrays", "Explain me like I'm five") => "Imagine you have a row of empty boxes, and each box has a number on it. You can put one toy in each box. An array is like that row of boxes, and you can store different things in each one!",
    ("arrays", "Explain me in a fun way") => "Arrays are like a digital treasure chest with multiple compartments. You can put your favorite memes, photos, or even entire video games in each compartment. The catch? You need a secret code (the index) to get to each one!",
    ("arrays", "Explain me with examples") => "In JavaScript, you can create an array like this: `const fruits = ['apple', 'banana', 'cherry'];`. You can access the first item with `fruits[0]` and get the count with `fruits.length`.",
    ("arrays", "Explain me in a story") => "Once, in a digital kingdom far, far away, there lived a wise data-sorcerer named Array. He had a magnificent scroll, and on it, he could write down a list of all the magic spells. Each spell was given a number, starting from zero. This allowed the king to call upon any spell instantly, just by knowing its number.",
    ("arrays", "Explain me in an interactive way") => "Let's explore arrays! An array is a list of items. What's the first item in this list: `['cat', 'dog', 'bird']`? What do you think the code `list[2]` would return?",
    ("variables", "Explain me like I'm five") => "A variable is like a box with a label. You can put things in the box, and you can change what's inside. The label lets you know what's in it, like 'toys' or 'cookies'.",
    ("variables", "Explain me in a fun way") => "Variables are like Pokémon. Each one has a name, and you can store different values (like Pokémon characters) inside them. You can 'catch' a new value and store it, or you can release the old one!",
    ("variables", "Explain me with examples") => "In programming, you declare a variable with a name and assign it a value. For example, `let score = 100;` declares a variable named 'score' with the value 100. Later, you can change its value with `score = 150;`.",
    ("variables", "Explain me in a story") => "In a great digital city, there was a hero named `name`. He could hold the name of anyone in the city. One day, the city's hero changed, and the variable `name` was quickly updated to reflect the new hero's name. The variable `name` was the city's living, breathing directory.",
    ("variables", "Explain me in an interactive way") => "A variable is a placeholder for information. What kind of information would you store in a variable called `yourName`? What about a variable called `isLoggedIn`?",
    _ => return None,
  };
  Some(answer)
}
